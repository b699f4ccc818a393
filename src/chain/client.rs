use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;

use crate::error::RpcError;

/// Ledger client trait - the only way the keeper talks to the chain
///
/// Aggregated reads are expressed as a single `call` against the
/// aggregator contract, so implementors only need these three primitives.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Read-only call against `target`, returning the raw return data
    async fn call(&self, target: Address, payload: Bytes) -> Result<Bytes, RpcError>;

    /// Deployed bytecode at `address` (empty when nothing is deployed)
    async fn get_code(&self, address: Address) -> Result<Bytes, RpcError>;

    /// Submit a state-changing call; returns the transaction hash
    async fn send_transaction(&self, target: Address, payload: Bytes) -> Result<B256, RpcError>;
}
