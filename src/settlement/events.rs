use std::sync::Arc;

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::AppResult;
use crate::registry::{Amount, ContractRecord, ContractRegistry, NewContract};
use crate::settlement::scheduler::ExpiryScheduler;

/// Inbound lifecycle notification, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Created {
        contract: NewContract,
    },
    Funded {
        address: Address,
        #[serde(default)]
        tx_ref: Option<String>,
    },
    LongEntered {
        address: Address,
        counterparty: Address,
        #[serde(default)]
        expiry_timestamp: Option<u64>,
        #[serde(default)]
        tx_ref: Option<String>,
    },
    Exercised {
        address: Address,
        #[serde(default)]
        tx_ref: Option<String>,
    },
    /// External confirmation that `resolve()` landed
    Resolved {
        address: Address,
        #[serde(default)]
        price_at_expiry: Option<Amount>,
        #[serde(default)]
        tx_ref: Option<String>,
    },
}

impl LifecycleEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::Created { .. } => "created",
            LifecycleEvent::Funded { .. } => "funded",
            LifecycleEvent::LongEntered { .. } => "long_entered",
            LifecycleEvent::Exercised { .. } => "exercised",
            LifecycleEvent::Resolved { .. } => "resolved",
        }
    }

    pub fn address(&self) -> Address {
        match self {
            LifecycleEvent::Created { contract } => contract.address,
            LifecycleEvent::Funded { address, .. }
            | LifecycleEvent::LongEntered { address, .. }
            | LifecycleEvent::Exercised { address, .. }
            | LifecycleEvent::Resolved { address, .. } => *address,
        }
    }
}

/// Acknowledgement returned for every handled event
#[derive(Debug, Clone, Serialize)]
pub struct EventAck {
    pub event_id: Uuid,
    pub kind: &'static str,
    pub address: Address,
    pub received_at: DateTime<Utc>,
    pub contract: ContractRecord,
}

/// Routes lifecycle events to registry mutations and scheduler arming
pub struct LifecycleHandler {
    registry: Arc<ContractRegistry>,
    scheduler: Arc<ExpiryScheduler>,
}

impl LifecycleHandler {
    pub fn new(registry: Arc<ContractRegistry>, scheduler: Arc<ExpiryScheduler>) -> Self {
        Self {
            registry,
            scheduler,
        }
    }

    pub async fn register(&self, contract: NewContract) -> AppResult<ContractRecord> {
        self.registry.register(contract).await
    }

    pub async fn handle_funded(
        &self,
        address: Address,
        tx_ref: Option<&str>,
    ) -> AppResult<ContractRecord> {
        let record = self.registry.mark_funded(address).await?;
        info!("💰 Contract {} funded (tx: {})", address, tx_ref.unwrap_or("-"));
        Ok(record)
    }

    pub async fn handle_long_entry(
        &self,
        address: Address,
        counterparty: Address,
        expiry: Option<u64>,
        tx_ref: Option<&str>,
    ) -> AppResult<ContractRecord> {
        let record = self
            .scheduler
            .on_counterparty_entered(address, counterparty, expiry)
            .await?;
        info!(
            "🤝 Counterparty {} entered {} (tx: {})",
            counterparty,
            address,
            tx_ref.unwrap_or("-")
        );
        Ok(record)
    }

    pub async fn handle_exercise(
        &self,
        address: Address,
        tx_ref: Option<&str>,
    ) -> AppResult<ContractRecord> {
        let record = self.registry.mark_exercised(address).await?;
        self.scheduler.disarm(address);
        info!("🎯 Contract {} exercised (tx: {})", address, tx_ref.unwrap_or("-"));
        Ok(record)
    }

    pub async fn handle_resolved(
        &self,
        address: Address,
        price_at_expiry: Option<Amount>,
        tx_ref: Option<&str>,
    ) -> AppResult<ContractRecord> {
        let record = self.registry.confirm_resolved(address, price_at_expiry).await?;
        self.scheduler.disarm(address);
        info!("✅ Contract {} resolution confirmed (tx: {})", address, tx_ref.unwrap_or("-"));
        Ok(record)
    }

    pub async fn dispatch(&self, event: LifecycleEvent) -> AppResult<EventAck> {
        let kind = event.kind();
        let address = event.address();

        let contract = match event {
            LifecycleEvent::Created { contract } => self.register(contract).await?,
            LifecycleEvent::Funded { address, tx_ref } => {
                self.handle_funded(address, tx_ref.as_deref()).await?
            }
            LifecycleEvent::LongEntered {
                address,
                counterparty,
                expiry_timestamp,
                tx_ref,
            } => {
                self.handle_long_entry(address, counterparty, expiry_timestamp, tx_ref.as_deref())
                    .await?
            }
            LifecycleEvent::Exercised { address, tx_ref } => {
                self.handle_exercise(address, tx_ref.as_deref()).await?
            }
            LifecycleEvent::Resolved {
                address,
                price_at_expiry,
                tx_ref,
            } => {
                self.handle_resolved(address, price_at_expiry, tx_ref.as_deref())
                    .await?
            }
        };

        Ok(EventAck {
            event_id: Uuid::new_v4(),
            kind,
            address,
            received_at: self.registry.clock().now(),
            contract,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::{BatcherConfig, CallBatcher};
    use crate::chain::mock::{MockContract, MockLedger};
    use crate::chain::RetryPolicy;
    use crate::clock::MockClock;
    use crate::error::{AppError, SchedulerError};
    use crate::registry::{InMemoryStore, MetadataCache};
    use crate::settlement::reader::ChainStateReader;
    use crate::settlement::scheduler::SchedulerConfig;
    use crate::settlement::timers::TimerState;
    use std::time::Duration;

    const ADDRESS: &str = "0x1111111111111111111111111111111111111111";

    fn handler() -> (LifecycleHandler, Arc<ExpiryScheduler>, Arc<MockLedger>) {
        let ledger = Arc::new(MockLedger::new());
        let clock = Arc::new(MockClock::at(1_700_000_000));
        let cache = Arc::new(MetadataCache::new(Duration::from_secs(15), clock.clone()));
        let registry = Arc::new(ContractRegistry::new(
            Arc::new(InMemoryStore::new()),
            cache,
            clock,
        ));
        let batcher = Arc::new(CallBatcher::new(
            ledger.clone(),
            BatcherConfig {
                multicall_address: Some(ledger.multicall),
                probe_ttl: Duration::from_secs(60),
                retry: RetryPolicy::default(),
            },
        ));
        let scheduler = Arc::new(ExpiryScheduler::new(
            registry.clone(),
            Arc::new(ChainStateReader::new(batcher)),
            SchedulerConfig::default(),
        ));
        (
            LifecycleHandler::new(registry, scheduler.clone()),
            scheduler,
            ledger,
        )
    }

    fn event(json: serde_json::Value) -> LifecycleEvent {
        serde_json::from_value(json).unwrap()
    }

    fn created() -> LifecycleEvent {
        event(serde_json::json!({
            "kind": "created",
            "contract": {
                "address": ADDRESS,
                "kind": "future",
                "strike_price": "2000000000",
                "notional_size": "1000000000000000000",
                "premium": "50000000"
            }
        }))
    }

    #[test]
    fn test_event_wire_format() {
        let entered = event(serde_json::json!({
            "kind": "long_entered",
            "address": ADDRESS,
            "counterparty": "0x2222222222222222222222222222222222222222",
            "expiry_timestamp": 1_700_086_400u64
        }));
        assert_eq!(entered.kind(), "long_entered");
        assert_eq!(entered.address(), Address::repeat_byte(0x11));

        assert!(serde_json::from_value::<LifecycleEvent>(serde_json::json!({
            "kind": "liquidated",
            "address": ADDRESS
        }))
        .is_err());
    }

    #[tokio::test]
    async fn test_full_lifecycle_through_dispatch() {
        let (handler, scheduler, ledger) = handler();
        let address = Address::repeat_byte(0x11);
        ledger.insert(address, MockContract::entered(1_700_086_400));

        let ack = handler.dispatch(created()).await.unwrap();
        assert_eq!(ack.kind, "created");
        assert_eq!(ack.address, address);

        let funded = handler
            .dispatch(event(serde_json::json!({
                "kind": "funded",
                "address": ADDRESS,
                "tx_ref": "0xabc"
            })))
            .await
            .unwrap();
        assert!(funded.contract.is_funded);
        assert_ne!(funded.event_id, ack.event_id);

        let entered = handler
            .dispatch(event(serde_json::json!({
                "kind": "long_entered",
                "address": ADDRESS,
                "counterparty": "0x2222222222222222222222222222222222222222"
            })))
            .await
            .unwrap();
        assert_eq!(entered.contract.expiry_timestamp, Some(1_700_086_400));
        assert_eq!(
            scheduler.timer(address).map(|t| t.state),
            Some(TimerState::Pending)
        );

        let resolved = handler
            .dispatch(event(serde_json::json!({
                "kind": "resolved",
                "address": ADDRESS,
                "price_at_expiry": "1950000000"
            })))
            .await
            .unwrap();
        assert!(resolved.contract.is_resolved);
        assert_eq!(
            resolved.contract.price_at_expiry,
            Some(Amount::from(1_950_000_000u64))
        );
        assert_eq!(
            scheduler.timer(address).map(|t| t.state),
            Some(TimerState::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_exercise_disarms_timer() {
        let (handler, scheduler, _ledger) = handler();
        let address = Address::repeat_byte(0x11);
        handler.dispatch(created()).await.unwrap();
        handler
            .handle_long_entry(address, Address::repeat_byte(0x22), Some(1_700_000_500), None)
            .await
            .unwrap();

        let record = handler.handle_exercise(address, Some("0xdef")).await.unwrap();

        assert!(record.is_exercised);
        assert_eq!(scheduler.get_status().await.unwrap().pending_timers, 0);

        let err = handler
            .handle_long_entry(address, Address::repeat_byte(0x22), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Scheduler(SchedulerError::AlreadyExercised(_))));
    }

    #[tokio::test]
    async fn test_event_for_unknown_contract() {
        let (handler, _, _) = handler();
        let err = handler
            .handle_funded(Address::repeat_byte(0x99), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
