use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::Address;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::Clock;

/// Cached entry with the time it was stored
#[derive(Debug, Clone)]
struct Cached<V> {
    value: V,
    cached_at: DateTime<Utc>,
}

/// Full list response, cached as one unit
#[derive(Debug, Clone, Serialize)]
pub struct Listing<V> {
    pub contracts: Vec<V>,
    /// Whether the chain reads behind this listing went through the aggregator
    pub aggregated: bool,
}

/// Read-side cache for contract metadata: one entry per address plus the full listing.
///
/// Invalidation is synchronous so a mutation is visible to the very next read.
pub struct MetadataCache<V> {
    entries: RwLock<HashMap<Address, Cached<V>>>,
    listing: RwLock<Option<Cached<Listing<V>>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> MetadataCache<V> {
    pub fn new(ttl: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            listing: RwLock::new(None),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(15)),
            clock,
        }
    }

    fn is_fresh(&self, cached_at: DateTime<Utc>) -> bool {
        self.clock.now() - cached_at < self.ttl
    }

    pub fn get(&self, address: Address) -> Option<V> {
        let entries = self.entries.read();
        let entry = entries.get(&address)?;
        if self.is_fresh(entry.cached_at) {
            debug!("✓ Metadata cache hit: {}", address);
            Some(entry.value.clone())
        } else {
            debug!("⚠ Metadata cache stale: {}", address);
            None
        }
    }

    pub fn set(&self, address: Address, value: V) {
        let entry = Cached {
            value,
            cached_at: self.clock.now(),
        };
        self.entries.write().insert(address, entry);
    }

    pub fn get_listing(&self) -> Option<Listing<V>> {
        let listing = self.listing.read();
        match listing.as_ref() {
            Some(entry) if self.is_fresh(entry.cached_at) => {
                debug!("✓ Listing cache hit ({} contracts)", entry.value.contracts.len());
                Some(entry.value.clone())
            }
            _ => None,
        }
    }

    pub fn set_listing(&self, listing: Listing<V>) {
        *self.listing.write() = Some(Cached {
            value: listing,
            cached_at: self.clock.now(),
        });
    }

    /// Drop the entry for `address` and the listing that contains it
    pub fn invalidate(&self, address: Address) {
        self.entries.write().remove(&address);
        *self.listing.write() = None;
        debug!("🔄 Metadata cache invalidated for {}", address);
    }

    pub fn size(&self) -> usize {
        self.entries.read().len()
    }

    /// Drop entries older than the TTL
    pub fn cleanup_expired(&self) {
        let now = self.clock.now();
        let mut entries = self.entries.write();

        let before = entries.len();
        entries.retain(|_, entry| now - entry.cached_at < self.ttl);
        let after = entries.len();

        if before > after {
            info!("🧹 Cleaned up {} expired metadata entries", before - after);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn cache(clock: Arc<MockClock>) -> MetadataCache<u32> {
        MetadataCache::new(std::time::Duration::from_secs(15), clock)
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let clock = Arc::new(MockClock::at(1_000));
        let cache = cache(clock.clone());
        let address = Address::repeat_byte(1);

        cache.set(address, 7);
        assert_eq!(cache.get(address), Some(7));

        clock.advance(14);
        assert_eq!(cache.get(address), Some(7));

        clock.advance(1);
        assert_eq!(cache.get(address), None);
    }

    #[test]
    fn test_invalidate_drops_entry_and_listing() {
        let clock = Arc::new(MockClock::at(1_000));
        let cache = cache(clock);
        let address = Address::repeat_byte(2);

        cache.set(address, 1);
        cache.set(Address::repeat_byte(3), 2);
        cache.set_listing(Listing {
            contracts: vec![1, 2],
            aggregated: true,
        });

        cache.invalidate(address);

        assert_eq!(cache.get(address), None);
        assert_eq!(cache.get(Address::repeat_byte(3)), Some(2));
        assert!(cache.get_listing().is_none());
    }

    #[test]
    fn test_cleanup_expired() {
        let clock = Arc::new(MockClock::at(1_000));
        let cache = cache(clock.clone());

        cache.set(Address::repeat_byte(4), 1);
        clock.advance(10);
        cache.set(Address::repeat_byte(5), 2);
        clock.advance(10);

        cache.cleanup_expired();
        assert_eq!(cache.size(), 1);
    }
}
