use std::time::Duration;

use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::{TransactionInput, TransactionRequest};
use alloy::transports::http::Http;
use alloy::transports::{TransportError, TransportErrorKind};
use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::{debug, instrument};

use crate::chain::client::LedgerClient;
use crate::error::RpcError;

/// JSON-RPC configuration for the ledger node
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub url: String,
    pub timeout: Duration,
    /// Account the node signs resolve transactions with
    pub sender: Address,
}

pub type HttpProvider = RootProvider<Http<Client>>;

/// Ledger client backed by an alloy HTTP provider
pub struct JsonRpcClient {
    provider: HttpProvider,
    sender: Address,
}

impl JsonRpcClient {
    pub fn new(config: RpcConfig) -> Result<Self, RpcError> {
        let url: Url = config
            .url
            .parse()
            .map_err(|e| RpcError::Transport(format!("invalid rpc url {}: {}", config.url, e)))?;
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let client = RpcClient::new(Http::with_client(http, url), false);
        Ok(Self {
            provider: ProviderBuilder::new().on_client(client),
            sender: config.sender,
        })
    }
}

/// Map a provider failure onto the retry classification
fn classify_transport(method: &str, err: TransportError) -> RpcError {
    match err {
        TransportError::ErrorResp(payload) => {
            debug!("RPC {} returned error {}: {}", method, payload.code, payload.message);
            RpcError::from_rpc(payload.code, payload.message.to_string())
        }
        TransportError::Transport(TransportErrorKind::HttpError(http)) => match http.status {
            429 => RpcError::RateLimited(format!("HTTP 429 from {}", method)),
            status if status >= 500 => RpcError::Transport(format!("HTTP {} from {}", status, method)),
            status => RpcError::Rejected {
                code: i64::from(status),
                message: http.body,
            },
        },
        TransportError::Transport(kind) => RpcError::Transport(format!("{}: {}", method, kind)),
        TransportError::NullResp => RpcError::Malformed(format!("{} returned null", method)),
        TransportError::DeserError { err, .. } => {
            RpcError::Malformed(format!("{} response: {}", method, err))
        }
        other => RpcError::Malformed(format!("{}: {}", method, other)),
    }
}

#[async_trait]
impl LedgerClient for JsonRpcClient {
    #[instrument(skip(self, payload), fields(payload_len = payload.len()))]
    async fn call(&self, target: Address, payload: Bytes) -> Result<Bytes, RpcError> {
        let request = TransactionRequest::default()
            .to(target)
            .input(TransactionInput::new(payload));

        self.provider
            .call(&request)
            .await
            .map_err(|e| classify_transport("eth_call", e))
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, RpcError> {
        self.provider
            .get_code_at(address)
            .await
            .map_err(|e| classify_transport("eth_getCode", e))
    }

    #[instrument(skip(self, payload))]
    async fn send_transaction(&self, target: Address, payload: Bytes) -> Result<B256, RpcError> {
        let request = TransactionRequest::default()
            .from(self.sender)
            .to(target)
            .input(TransactionInput::new(payload));

        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(|e| classify_transport("eth_sendTransaction", e))?;

        Ok(*pending.tx_hash())
    }
}
