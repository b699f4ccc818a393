use std::sync::Arc;

use alloy_primitives::{Address, Bytes};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::registry::{ContractRecord, ContractRegistry, Listing};
use crate::settlement::classifier::{classify, ResolutionStatus};
use crate::settlement::reader::ChainStateReader;

/// Read-API view of a contract: every record field plus the derived status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractMetadata {
    #[serde(flatten)]
    pub record: ContractRecord,
    pub is_expired: bool,
    pub resolution_status: ResolutionStatus,
    /// Hex-encoded parameter blob, for kinds that expose one
    pub parameters: Option<String>,
}

impl ContractMetadata {
    pub fn from_record(record: &ContractRecord, now: u64, parameters: Option<&Bytes>) -> Self {
        let classification = classify(record, now);
        Self {
            record: record.clone(),
            is_expired: classification.is_expired,
            resolution_status: classification.resolution_status,
            parameters: parameters.map(|p| format!("0x{}", hex::encode(p))),
        }
    }
}

/// Batched, cached contract listing for the read API
pub struct ContractFeed {
    registry: Arc<ContractRegistry>,
    reader: Arc<ChainStateReader>,
}

impl ContractFeed {
    pub fn new(registry: Arc<ContractRegistry>, reader: Arc<ChainStateReader>) -> Self {
        Self { registry, reader }
    }

    /// Last aggregator probe result, `None` before the first read
    pub fn aggregator_availability(&self) -> Option<bool> {
        self.reader.batcher().last_known_availability()
    }

    /// Every tracked contract with live state, read in one batch.
    /// Contracts whose state cannot be decoded are left out.
    #[instrument(skip(self))]
    pub async fn list_contracts(&self) -> AppResult<Listing<ContractMetadata>> {
        let cache = self.registry.cache();
        if let Some(listing) = cache.get_listing() {
            return Ok(listing);
        }

        let records = self.registry.all().await?;
        let addresses: Vec<Address> = records.iter().map(|r| r.address).collect();
        let read = self.reader.read_states(&addresses).await;
        let now = self.registry.clock().unix_now();

        let contracts: Vec<ContractMetadata> = records
            .iter()
            .zip(read.states)
            .filter_map(|(record, state)| {
                let state = state?;
                let metadata = ContractMetadata::from_record(
                    &state.merge_into(record),
                    now,
                    state.parameters.as_ref(),
                );
                cache.set(record.address, metadata.clone());
                Some(metadata)
            })
            .collect();

        if !records.is_empty() && contracts.is_empty() {
            return Err(AppError::StateUnavailable(format!(
                "none of {} contracts could be read",
                records.len()
            )));
        }
        if contracts.len() < records.len() {
            warn!(
                "⚠️ Listing omits {} of {} contracts with unreadable state",
                records.len() - contracts.len(),
                records.len()
            );
        }

        let listing = Listing {
            contracts,
            aggregated: read.aggregated,
        };
        cache.set_listing(listing.clone());
        info!(
            "📋 Listed {} contracts (aggregated: {})",
            listing.contracts.len(),
            listing.aggregated
        );

        Ok(listing)
    }

    pub async fn get_contract(&self, address: Address) -> AppResult<ContractMetadata> {
        let cache = self.registry.cache();
        if let Some(metadata) = cache.get(address) {
            return Ok(metadata);
        }

        let record = self.registry.require(address).await?;
        let state = self
            .reader
            .read_state(address)
            .await
            .ok_or_else(|| AppError::StateUnavailable(format!("state of {} could not be read", address)))?;

        let now = self.registry.clock().unix_now();
        let metadata =
            ContractMetadata::from_record(&state.merge_into(&record), now, state.parameters.as_ref());
        cache.set(address, metadata.clone());

        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::{BatcherConfig, CallBatcher};
    use crate::chain::mock::{MockContract, MockLedger};
    use crate::chain::RetryPolicy;
    use crate::clock::MockClock;
    use crate::registry::{Amount, ContractKind, InMemoryStore, MetadataCache, NewContract};
    use std::time::Duration;

    struct Fixture {
        ledger: Arc<MockLedger>,
        clock: Arc<MockClock>,
        registry: Arc<ContractRegistry>,
        feed: ContractFeed,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(MockLedger::new());
        let clock = Arc::new(MockClock::at(10_000));
        let cache = Arc::new(MetadataCache::new(Duration::from_secs(15), clock.clone()));
        let registry = Arc::new(ContractRegistry::new(
            Arc::new(InMemoryStore::new()),
            cache,
            clock.clone(),
        ));
        let batcher = Arc::new(CallBatcher::new(
            ledger.clone(),
            BatcherConfig {
                multicall_address: Some(ledger.multicall),
                probe_ttl: Duration::from_secs(60),
                retry: RetryPolicy::default(),
            },
        ));
        let feed = ContractFeed::new(registry.clone(), Arc::new(ChainStateReader::new(batcher)));
        Fixture {
            ledger,
            clock,
            registry,
            feed,
        }
    }

    async fn track(f: &Fixture, byte: u8, expiry: u64) -> Address {
        let address = Address::repeat_byte(byte);
        f.ledger.insert(address, MockContract::entered(expiry));
        f.registry
            .register(NewContract {
                address,
                kind: ContractKind::Option,
                counterparty_short: None,
                strike_price: Amount::from(1u64),
                notional_size: Amount::from(1u64),
                premium: Amount::ZERO,
                expiry_timestamp: Some(expiry),
            })
            .await
            .unwrap();
        address
    }

    #[tokio::test]
    async fn test_listing_is_cached_until_ttl() {
        let f = fixture();
        track(&f, 1, 20_000).await;
        track(&f, 2, 20_000).await;

        let first = f.feed.list_contracts().await.unwrap();
        let second = f.feed.list_contracts().await.unwrap();
        assert_eq!(first.contracts.len(), 2);
        assert_eq!(first.contracts, second.contracts);
        assert!(first.aggregated);
        assert_eq!(f.registry.cache().size(), 2);
        assert_eq!(f.ledger.aggregate_calls(), 1);

        f.clock.advance(16);
        f.feed.list_contracts().await.unwrap();
        assert_eq!(f.ledger.aggregate_calls(), 2);
    }

    #[tokio::test]
    async fn test_lifecycle_change_is_visible_immediately() {
        let f = fixture();
        let address = track(&f, 1, 20_000).await;

        let before = f.feed.get_contract(address).await.unwrap();
        assert!(!before.record.is_exercised);

        f.registry.mark_exercised(address).await.unwrap();

        let after = f.feed.get_contract(address).await.unwrap();
        assert!(after.record.is_exercised);
    }

    #[tokio::test]
    async fn test_unreadable_contract_is_omitted() {
        let f = fixture();
        track(&f, 1, 9_000).await;
        let bad = track(&f, 2, 9_000).await;
        f.ledger.update(bad, |c| c.malformed_status = true);

        let listing = f.feed.list_contracts().await.unwrap();
        assert_eq!(listing.contracts.len(), 1);
        assert_eq!(
            listing.contracts[0].resolution_status,
            ResolutionStatus::NeedsResolution
        );
        assert!(listing.contracts[0].is_expired);
        assert_eq!(listing.contracts[0].parameters.as_deref(), Some("0x0102"));
    }

    #[tokio::test]
    async fn test_total_failure_is_an_error() {
        let f = fixture();
        let bad = track(&f, 1, 9_000).await;
        f.ledger.update(bad, |c| c.malformed_status = true);

        assert!(matches!(
            f.feed.list_contracts().await,
            Err(AppError::StateUnavailable(_))
        ));
        assert!(matches!(
            f.feed.get_contract(bad).await,
            Err(AppError::StateUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_registry_lists_nothing() {
        let f = fixture();
        let listing = f.feed.list_contracts().await.unwrap();
        assert!(listing.contracts.is_empty());
        assert!(listing.aggregated);
        assert_eq!(f.ledger.aggregate_calls(), 0);
    }

    #[test]
    fn test_metadata_serializes_flat() {
        let record = ContractRecord::new(
            NewContract {
                address: Address::repeat_byte(1),
                kind: ContractKind::Exotic,
                counterparty_short: None,
                strike_price: Amount::from(5u64),
                notional_size: Amount::from(1u64),
                premium: Amount::ZERO,
                expiry_timestamp: Some(100),
            },
            chrono::Utc::now(),
        );
        let json = serde_json::to_value(ContractMetadata::from_record(&record, 200, None)).unwrap();

        assert_eq!(json["strike_price"], "5");
        assert_eq!(json["kind"], "exotic");
        assert_eq!(json["is_expired"], true);
        assert_eq!(json["resolution_status"], "needs_resolution");
        assert!(json["parameters"].is_null());
    }
}
