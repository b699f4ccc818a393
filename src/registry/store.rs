use std::collections::HashMap;

use alloy_primitives::Address;
use async_trait::async_trait;

use crate::error::{AppError, AppResult};
use crate::registry::models::ContractRecord;

/// Persistence seam for contract records
#[async_trait]
pub trait ContractStore: Send + Sync {
    /// Insert a new record; fails with `AlreadyRegistered` on a duplicate address
    async fn insert(&self, record: &ContractRecord) -> AppResult<()>;

    async fn get(&self, address: Address) -> AppResult<Option<ContractRecord>>;

    /// Overwrite an existing record
    async fn update(&self, record: &ContractRecord) -> AppResult<()>;

    /// All records, oldest first
    async fn list(&self) -> AppResult<Vec<ContractRecord>>;

    fn backend(&self) -> &'static str;
}

/// Process-local store, used when no database is configured
pub struct InMemoryStore {
    records: tokio::sync::RwLock<HashMap<Address, ContractRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: tokio::sync::RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContractStore for InMemoryStore {
    async fn insert(&self, record: &ContractRecord) -> AppResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.address) {
            return Err(AppError::AlreadyRegistered(record.address));
        }
        records.insert(record.address, record.clone());
        Ok(())
    }

    async fn get(&self, address: Address) -> AppResult<Option<ContractRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&address).cloned())
    }

    async fn update(&self, record: &ContractRecord) -> AppResult<()> {
        let mut records = self.records.write().await;
        let slot = records
            .get_mut(&record.address)
            .ok_or_else(|| AppError::NotFound(format!("Contract {} not found", record.address)))?;
        *slot = record.clone();
        Ok(())
    }

    async fn list(&self) -> AppResult<Vec<ContractRecord>> {
        let records = self.records.read().await;
        let mut all: Vec<ContractRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.address.cmp(&b.address))
        });
        Ok(all)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
