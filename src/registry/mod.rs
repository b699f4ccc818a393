pub mod cache;
pub mod models;
pub mod postgres;
pub mod store;

pub use cache::{Listing, MetadataCache};
pub use models::{parse_address, Amount, ContractKind, ContractRecord, NewContract};
pub use postgres::PgContractStore;
pub use store::{ContractStore, InMemoryStore};

use std::sync::Arc;

use alloy_primitives::Address;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{AppError, AppResult, SchedulerError};
use crate::settlement::classifier::{classify, ResolutionStatus};
use crate::settlement::feed::ContractMetadata;

/// Local mirror of tracked contracts.
///
/// All writes go through here: they are serialized, persisted, and drop the
/// matching cache entries before returning.
pub struct ContractRegistry {
    store: Arc<dyn ContractStore>,
    cache: Arc<MetadataCache<ContractMetadata>>,
    clock: Arc<dyn Clock>,
    writes: tokio::sync::Mutex<()>,
}

impl ContractRegistry {
    pub fn new(
        store: Arc<dyn ContractStore>,
        cache: Arc<MetadataCache<ContractMetadata>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            writes: tokio::sync::Mutex::new(()),
        }
    }

    pub fn cache(&self) -> &Arc<MetadataCache<ContractMetadata>> {
        &self.cache
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub async fn register(&self, contract: NewContract) -> AppResult<ContractRecord> {
        let _guard = self.writes.lock().await;
        let record = ContractRecord::new(contract, self.clock.now());
        self.store.insert(&record).await?;
        self.cache.invalidate(record.address);

        info!("📝 Registered {} contract {}", record.kind, record.address);
        Ok(record)
    }

    pub async fn get(&self, address: Address) -> AppResult<Option<ContractRecord>> {
        self.store.get(address).await
    }

    pub async fn require(&self, address: Address) -> AppResult<ContractRecord> {
        self.get(address)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Contract {} not found", address)))
    }

    pub async fn all(&self) -> AppResult<Vec<ContractRecord>> {
        self.store.list().await
    }

    /// Records the classifier currently reports as `needs_resolution`
    pub async fn needs_resolution(&self) -> AppResult<Vec<ContractRecord>> {
        let now = self.clock.unix_now();
        let due = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|r| classify(r, now).resolution_status == ResolutionStatus::NeedsResolution)
            .collect();
        Ok(due)
    }

    /// Entered, armed, unresolved and unexercised records; these get timers after a restart
    pub async fn awaiting_expiry(&self) -> AppResult<Vec<ContractRecord>> {
        let armed = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(ContractRecord::awaits_expiry)
            .collect();
        Ok(armed)
    }

    pub async fn mark_funded(&self, address: Address) -> AppResult<ContractRecord> {
        let now = self.clock.now();
        self.mutate(address, |record| {
            if record.is_funded {
                return Ok(false);
            }
            record.is_funded = true;
            record.funded_at = Some(now);
            Ok(true)
        })
        .await
    }

    /// Counterparty entry: activates the contract and stores the resolved expiry
    pub async fn mark_entered(
        &self,
        address: Address,
        counterparty: Address,
        expiry: u64,
    ) -> AppResult<ContractRecord> {
        let now = self.clock.now();
        self.mutate(address, |record| {
            ensure_open(record)?;
            record.counterparty_long = Some(counterparty);
            record.is_active = true;
            record.entered_at.get_or_insert(now);
            record.expiry_timestamp = Some(expiry);
            Ok(true)
        })
        .await
    }

    pub async fn mark_exercised(&self, address: Address) -> AppResult<ContractRecord> {
        let now = self.clock.now();
        self.mutate(address, |record| {
            if record.is_exercised {
                return Ok(false);
            }
            if record.is_resolved {
                return Err(SchedulerError::AlreadyResolved(address).into());
            }
            record.is_exercised = true;
            record.exercised_at = Some(now);
            Ok(true)
        })
        .await
    }

    /// Confirmed resolution, from an external callback or a chain read.
    /// `resolved_at` is set once; later confirmations only fill a missing price.
    pub async fn confirm_resolved(
        &self,
        address: Address,
        price_at_expiry: Option<Amount>,
    ) -> AppResult<ContractRecord> {
        let now = self.clock.now();
        self.mutate(address, |record| {
            if record.is_resolved {
                if record.price_at_expiry.is_none() && price_at_expiry.is_some() {
                    record.price_at_expiry = price_at_expiry;
                    return Ok(true);
                }
                return Ok(false);
            }
            record.is_resolved = true;
            record.resolved_at = Some(now);
            if price_at_expiry.is_some() {
                record.price_at_expiry = price_at_expiry;
            }
            Ok(true)
        })
        .await
    }

    /// Serialized read-modify-write. `apply` returns whether anything changed;
    /// unchanged records skip the store write.
    async fn mutate<F>(&self, address: Address, apply: F) -> AppResult<ContractRecord>
    where
        F: FnOnce(&mut ContractRecord) -> AppResult<bool>,
    {
        let _guard = self.writes.lock().await;
        let mut record = self.require(address).await?;

        if apply(&mut record)? {
            self.store.update(&record).await?;
            debug!("Updated contract {}", address);
        }
        self.cache.invalidate(address);

        Ok(record)
    }
}

fn ensure_open(record: &ContractRecord) -> AppResult<()> {
    if record.is_resolved {
        return Err(SchedulerError::AlreadyResolved(record.address).into());
    }
    if record.is_exercised {
        return Err(SchedulerError::AlreadyExercised(record.address).into());
    }
    Ok(())
}
