use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use alloy_sol_types::SolCall;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::batcher::call::{BatchResult, CallDescriptor, SlotOutcome};
use crate::chain::abi::{aggregate3Call, Multicall3Call, Multicall3Result};
use crate::chain::{with_retry, LedgerClient, RetryPolicy};
use crate::error::{DecodeError, RpcError};

/// Batcher configuration
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Multicall3 deployment; `None` forces the per-call path
    pub multicall_address: Option<Address>,
    /// How long a presence probe result is trusted
    pub probe_ttl: Duration,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy)]
struct ProbeState {
    available: bool,
    checked_at: Instant,
}

/// Call batcher - folds N reads into one aggregator round trip
///
/// Falls back to one call per descriptor when the aggregator is missing or
/// unreachable. Both paths produce the same shape; only `aggregated` differs.
pub struct CallBatcher {
    client: Arc<dyn LedgerClient>,
    config: BatcherConfig,
    probe: Mutex<Option<ProbeState>>,
}

impl CallBatcher {
    pub fn new(client: Arc<dyn LedgerClient>, config: BatcherConfig) -> Self {
        Self {
            client,
            config,
            probe: Mutex::new(None),
        }
    }

    pub fn client(&self) -> Arc<dyn LedgerClient> {
        self.client.clone()
    }

    /// Last probe outcome without touching the network
    pub fn last_known_availability(&self) -> Option<bool> {
        self.probe.lock().map(|p| p.available)
    }

    /// Check whether aggregator bytecode is deployed. Never fails: errors count as unavailable.
    pub async fn is_available(&self) -> bool {
        let Some(multicall) = self.config.multicall_address else {
            return false;
        };

        if let Some(state) = *self.probe.lock() {
            if state.checked_at.elapsed() < self.config.probe_ttl {
                return state.available;
            }
        }

        let available = match self.client.get_code(multicall).await {
            Ok(code) => !code.is_empty(),
            Err(e) => {
                warn!("⚠️ Aggregator probe failed for {}: {}", multicall, e);
                false
            }
        };

        if available {
            debug!("✓ Aggregator present at {}", multicall);
        } else {
            warn!("⚠️ Aggregator not available at {}, using per-call reads", multicall);
        }

        *self.probe.lock() = Some(ProbeState {
            available,
            checked_at: Instant::now(),
        });

        available
    }

    /// Execute `calls` as one batch. `result.len() == calls.len()` on every path.
    #[instrument(skip(self, calls), fields(calls = calls.len()))]
    pub async fn aggregate<T>(&self, calls: &[CallDescriptor<T>]) -> BatchResult<T>
    where
        T: Clone + Send + Sync,
    {
        if calls.is_empty() {
            return BatchResult {
                slots: Vec::new(),
                aggregated: true,
            };
        }

        if let Some(multicall) = self.config.multicall_address {
            if self.is_available().await {
                match self.aggregate_round_trip(multicall, calls).await {
                    Ok(results) => {
                        let slots = calls
                            .iter()
                            .zip(results)
                            .enumerate()
                            .map(|(index, (call, result))| {
                                let raw = if result.success {
                                    Ok(result.returnData.as_ref())
                                } else {
                                    Err(DecodeError::Reverted)
                                };
                                log_slot(index, call, call.settle(raw))
                            })
                            .collect();

                        return BatchResult {
                            slots,
                            aggregated: true,
                        };
                    }
                    Err(reason) => {
                        warn!(
                            "⚠️ Aggregate read of {} calls failed ({}), falling back to per-call reads",
                            calls.len(),
                            reason
                        );
                    }
                }
            }
        }

        self.per_call(calls).await
    }

    async fn aggregate_round_trip<T>(
        &self,
        multicall: Address,
        calls: &[CallDescriptor<T>],
    ) -> Result<Vec<Multicall3Result>, String> {
        let request = aggregate3Call {
            calls: calls
                .iter()
                .map(|call| Multicall3Call {
                    target: call.target,
                    allowFailure: true,
                    callData: call.payload.clone(),
                })
                .collect(),
        };
        let payload: alloy_primitives::Bytes = request.abi_encode().into();

        let raw = with_retry(&self.config.retry, "aggregate read", || {
            self.client.call(multicall, payload.clone())
        })
        .await
        .map_err(|e| e.to_string())?;

        let decoded = aggregate3Call::abi_decode_returns(&raw, true)
            .map_err(|e| format!("undecodable aggregate response: {}", e))?;

        if decoded.returnData.len() != calls.len() {
            return Err(format!(
                "aggregate returned {} results for {} calls",
                decoded.returnData.len(),
                calls.len()
            ));
        }

        Ok(decoded.returnData)
    }

    async fn per_call<T>(&self, calls: &[CallDescriptor<T>]) -> BatchResult<T>
    where
        T: Clone + Send + Sync,
    {
        info!("🔁 Reading {} calls individually", calls.len());

        let reads = calls.iter().map(|call| async move {
            with_retry(&self.config.retry, "single read", || {
                self.client.call(call.target, call.payload.clone())
            })
            .await
        });
        let raw_results = join_all(reads).await;

        let slots = calls
            .iter()
            .zip(raw_results)
            .enumerate()
            .map(|(index, (call, raw))| {
                let slot = match raw {
                    Ok(bytes) => call.settle(Ok(bytes.as_ref())),
                    Err(RpcError::Reverted(_)) => call.settle(Err(DecodeError::Reverted)),
                    Err(e) => call.settle(Err(DecodeError::CallFailed(e.to_string()))),
                };
                log_slot(index, call, slot)
            })
            .collect();

        BatchResult {
            slots,
            aggregated: false,
        }
    }
}

fn log_slot<T>(index: usize, call: &CallDescriptor<T>, slot: SlotOutcome<T>) -> SlotOutcome<T> {
    match &slot {
        SlotOutcome::Decoded(_) => {}
        SlotOutcome::Fallback { error, .. } => {
            debug!("Slot {} ({}) used fallback: {}", index, call.target, error);
        }
        SlotOutcome::Failed(error) => {
            warn!("⚠️ Slot {} ({}) failed to decode: {}", index, call.target, error);
        }
    }
    slot
}
