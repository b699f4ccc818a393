pub mod abi;
pub mod client;
pub mod retry;
pub mod rpc;

#[cfg(test)]
pub mod mock;

pub use client::LedgerClient;
pub use retry::{with_retry, with_retry_if, RetryPolicy};
pub use rpc::{JsonRpcClient, RpcConfig};
