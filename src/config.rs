use std::time::Duration;

use alloy_primitives::Address;
use config::{Environment, Source};
use serde::Deserialize;

use crate::batcher::BatcherConfig;
use crate::chain::{RetryPolicy, RpcConfig};
use crate::error::{AppError, AppResult};
use crate::registry::parse_address;
use crate::settlement::SchedulerConfig;

/// Canonical Multicall3 deployment, identical on most EVM chains
pub const DEFAULT_MULTICALL_ADDRESS: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub bind_address: String,
    pub rpc_url: String,
    pub rpc_timeout_ms: u64,
    /// `none` or `disabled` turns the aggregator off
    pub multicall_address: String,
    /// Node-managed account that sends resolve transactions
    #[serde(default)]
    pub resolver_address: Option<String>,
    /// In-memory store when unset
    #[serde(default)]
    pub database_url: Option<String>,
    pub default_expiry_secs: u64,
    pub sweep_interval_secs: u64,
    pub list_cache_ttl_secs: u64,
    pub probe_ttl_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub rate_limit_per_minute: u32,
    /// Comma-separated; `*` allows any origin
    pub cors_origins: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_source(Environment::default().try_parsing(true))
    }

    fn from_source<S>(source: S) -> Result<Self, config::ConfigError>
    where
        S: Source + Send + Sync + 'static,
    {
        config::Config::builder()
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("rpc_url", "http://localhost:8545")?
            .set_default("rpc_timeout_ms", 10_000)?
            .set_default("multicall_address", DEFAULT_MULTICALL_ADDRESS)?
            .set_default("default_expiry_secs", 7 * 24 * 3600)?
            .set_default("sweep_interval_secs", 60)?
            .set_default("list_cache_ttl_secs", 15)?
            .set_default("probe_ttl_secs", 300)?
            .set_default("retry_max_attempts", 3)?
            .set_default("retry_base_delay_ms", 1_000)?
            .set_default("retry_max_delay_ms", 30_000)?
            .set_default("rate_limit_per_minute", 100)?
            .set_default("cors_origins", "http://localhost:3000")?
            .add_source(source)
            .build()?
            .try_deserialize()
    }

    /// `Ok(None)` when the aggregator is switched off
    pub fn multicall(&self) -> AppResult<Option<Address>> {
        match self.multicall_address.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "disabled" => Ok(None),
            _ => parse_address(&self.multicall_address)
                .map(Some)
                .map_err(|_| AppError::Config(format!("Invalid MULTICALL_ADDRESS: {}", self.multicall_address))),
        }
    }

    pub fn resolver(&self) -> AppResult<Address> {
        let raw = self
            .resolver_address
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::Config("RESOLVER_ADDRESS must be set".into()))?;
        parse_address(raw).map_err(|_| AppError::Config(format!("Invalid RESOLVER_ADDRESS: {}", raw)))
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_deref().filter(|s| !s.trim().is_empty())
    }

    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    pub fn rpc(&self) -> AppResult<RpcConfig> {
        Ok(RpcConfig {
            url: self.rpc_url.clone(),
            timeout: Duration::from_millis(self.rpc_timeout_ms),
            sender: self.resolver()?,
        })
    }

    pub fn batcher(&self) -> AppResult<BatcherConfig> {
        Ok(BatcherConfig {
            multicall_address: self.multicall()?,
            probe_ttl: Duration::from_secs(self.probe_ttl_secs),
            retry: self.retry_policy(),
        })
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            default_expiry: Duration::from_secs(self.default_expiry_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            retry: self.retry_policy(),
        }
    }

    pub fn list_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.list_cache_ttl_secs)
    }
}
