// Expiry scheduler - drives entered contracts through `resolve()` once expired
//
// Two triggers feed the same resolution path:
// - per-contract timers, armed on counterparty entry
// - a periodic sweep over everything the classifier reports as due
//
// Every attempt re-reads chain state first; the registry is only updated by
// confirmed reads or confirmation events, never optimistically.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256};
use alloy_sol_types::SolCall;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::chain::abi::resolveCall;
use crate::chain::{with_retry_if, LedgerClient, RetryPolicy};
use crate::error::{AppError, AppResult, RpcError};
use crate::registry::{ContractRecord, ContractRegistry};
use crate::settlement::classifier::{classify, ResolutionStatus};
use crate::settlement::reader::{ChainStateReader, OnChainState};
use crate::settlement::timers::{Timer, TimerRegistry};

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Expiry applied when neither the chain nor the caller supplies one
    pub default_expiry: Duration,
    pub sweep_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_expiry: Duration::from_secs(7 * 24 * 3600),
            sweep_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of one resolution attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Submitted(B256),
    /// Chain state says nothing to do
    Skipped(ResolutionStatus),
    /// Another attempt for the same address is running
    InFlight,
    /// State read failed; left for the next sweep
    Unreadable,
    Failed(RpcError),
}

/// Sweep execution summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub due: usize,
    pub submitted: usize,
    pub skipped: usize,
    pub in_flight: usize,
    pub unreadable: usize,
    pub failed: usize,
    pub aggregated: bool,
}

impl SweepReport {
    fn record(&mut self, outcome: &AttemptOutcome) {
        match outcome {
            AttemptOutcome::Submitted(_) => self.submitted += 1,
            AttemptOutcome::Skipped(_) => self.skipped += 1,
            AttemptOutcome::InFlight => self.in_flight += 1,
            AttemptOutcome::Unreadable => self.unreadable += 1,
            AttemptOutcome::Failed(_) => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub tracked_contracts: usize,
    /// Per-contract metadata entries currently cached
    pub cached_contracts: usize,
    pub pending_timers: usize,
    pub in_flight: usize,
    pub last_sweep_at: Option<DateTime<Utc>>,
    pub last_sweep: Option<SweepReport>,
    /// `None` until the aggregator has been probed
    pub aggregator_available: Option<bool>,
    pub store: &'static str,
}

/// Per-address claim; released on drop
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<Address>>,
    address: Address,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.address);
    }
}

pub struct ExpiryScheduler {
    registry: Arc<ContractRegistry>,
    reader: Arc<ChainStateReader>,
    client: Arc<dyn LedgerClient>,
    timers: TimerRegistry,
    fires: Mutex<Option<mpsc::UnboundedReceiver<Address>>>,
    in_flight: Mutex<HashSet<Address>>,
    /// Held across the expiry write and the timer arm
    arming: tokio::sync::Mutex<()>,
    last_sweep: Mutex<Option<(DateTime<Utc>, SweepReport)>>,
    config: SchedulerConfig,
}

impl ExpiryScheduler {
    pub fn new(
        registry: Arc<ContractRegistry>,
        reader: Arc<ChainStateReader>,
        config: SchedulerConfig,
    ) -> Self {
        let (timers, fires) = TimerRegistry::new(registry.clock().clone());
        let client = reader.batcher().client();
        Self {
            registry,
            reader,
            client,
            timers,
            fires: Mutex::new(Some(fires)),
            in_flight: Mutex::new(HashSet::new()),
            arming: tokio::sync::Mutex::new(()),
            last_sweep: Mutex::new(None),
            config,
        }
    }

    pub fn timer(&self, address: Address) -> Option<Timer> {
        self.timers.get(address)
    }

    fn claim(&self, address: Address) -> Option<InFlightGuard<'_>> {
        if !self.in_flight.lock().insert(address) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            address,
        })
    }

    /// Expiry precedence: on-chain value for kinds that record one, then the
    /// caller's value, then the configured default from now.
    async fn resolve_expiry(&self, record: &ContractRecord, explicit: Option<u64>) -> u64 {
        if record.kind.has_onchain_expiry() {
            if let Some(onchain) = self.reader.read_expiry(record.address).await {
                return onchain;
            }
            debug!("No on-chain expiry for {} {}, using fallback", record.kind, record.address);
        }

        match explicit {
            Some(expiry) if expiry > 0 => expiry,
            _ => self.registry.clock().unix_now() + self.config.default_expiry.as_secs(),
        }
    }

    /// Counterparty entry: record the expiry and arm (or re-arm) the timer
    #[instrument(skip(self))]
    pub async fn on_counterparty_entered(
        &self,
        address: Address,
        counterparty: Address,
        explicit_expiry: Option<u64>,
    ) -> AppResult<ContractRecord> {
        let record = self.registry.require(address).await?;
        let expiry = self.resolve_expiry(&record, explicit_expiry).await;

        let _arming = self.arming.lock().await;
        let record = self.registry.mark_entered(address, counterparty, expiry).await?;
        // Expiry comparison is strict, so fire one second after it
        self.timers.arm(address, expiry.saturating_add(1));
        info!("⏰ Contract {} armed, expires at {}", address, expiry);

        Ok(record)
    }

    /// Terminal transition seen outside the scheduler; the timer has nothing left to do
    pub fn disarm(&self, address: Address) -> bool {
        self.timers.cancel(address)
    }

    pub async fn on_timer_fire(&self, address: Address) -> AppResult<AttemptOutcome> {
        info!("⏰ Expiry timer fired for {}", address);
        self.attempt_resolution(address).await
    }

    /// Re-read one contract and submit `resolve()` if it is due
    #[instrument(skip(self))]
    pub async fn attempt_resolution(&self, address: Address) -> AppResult<AttemptOutcome> {
        let Some(_guard) = self.claim(address) else {
            warn!("⚠️ Scheduling conflict: resolution of {} already in flight", address);
            return Ok(AttemptOutcome::InFlight);
        };

        let record = self.registry.require(address).await?;
        let state = self.reader.read_state(address).await;
        Ok(self.settle(&record, state).await)
    }

    /// Resolve a set of records with one batched state read
    pub async fn resolve_batch(&self, records: Vec<ContractRecord>) -> SweepReport {
        let mut report = SweepReport {
            due: records.len(),
            aggregated: true,
            ..Default::default()
        };

        let mut claimed = Vec::with_capacity(records.len());
        for record in records {
            match self.claim(record.address) {
                Some(guard) => claimed.push((record, guard)),
                None => {
                    warn!(
                        "⚠️ Scheduling conflict: resolution of {} already in flight",
                        record.address
                    );
                    report.record(&AttemptOutcome::InFlight);
                }
            }
        }
        if claimed.is_empty() {
            return report;
        }

        let addresses: Vec<Address> = claimed.iter().map(|(r, _)| r.address).collect();
        let read = self.reader.read_states(&addresses).await;
        report.aggregated = read.aggregated;

        let attempts = claimed
            .iter()
            .zip(read.states)
            .map(|((record, _guard), state)| self.settle(record, state));
        for outcome in join_all(attempts).await {
            report.record(&outcome);
        }

        report
    }

    /// Decide on fresh chain state. Caller holds the in-flight claim.
    async fn settle(&self, record: &ContractRecord, state: Option<OnChainState>) -> AttemptOutcome {
        let address = record.address;
        let Some(state) = state else {
            warn!("⚠️ Skipping {}: on-chain state unreadable", address);
            return AttemptOutcome::Unreadable;
        };

        self.sync_terminal_state(record, &state).await;

        let now = self.registry.clock().unix_now();
        let merged = state.merge_into(record);
        match classify(&merged, now).resolution_status {
            ResolutionStatus::NeedsResolution => self.submit(address).await,
            status => {
                debug!("Nothing to resolve for {} ({:?})", address, status);
                AttemptOutcome::Skipped(status)
            }
        }
    }

    /// Write confirmed terminal flags from the chain back into the registry
    async fn sync_terminal_state(&self, record: &ContractRecord, state: &OnChainState) {
        let address = record.address;

        if state.resolved && !record.is_resolved {
            let price = (!state.price_at_expiry.is_zero()).then_some(state.price_at_expiry);
            match self.registry.confirm_resolved(address, price).await {
                Ok(_) => info!("✓ Chain confirms {} resolved", address),
                Err(e) => error!("❌ Failed to record resolution of {}: {}", address, e),
            }
            self.timers.cancel(address);
        } else if state.exercised && !record.is_exercised && !record.is_resolved {
            match self.registry.mark_exercised(address).await {
                Ok(_) => info!("✓ Chain confirms {} exercised", address),
                Err(e) => error!("❌ Failed to record exercise of {}: {}", address, e),
            }
            self.timers.cancel(address);
        }
    }

    async fn submit(&self, address: Address) -> AttemptOutcome {
        let payload: Bytes = resolveCall {}.abi_encode().into();

        let result = with_retry_if(
            &self.config.retry,
            "resolve submission",
            RpcError::is_retryable_write,
            || self.client.send_transaction(address, payload.clone()),
        )
        .await;

        match result {
            Ok(tx_hash) => {
                info!("✅ Resolve submitted for {}: {}", address, tx_hash);
                AttemptOutcome::Submitted(tx_hash)
            }
            Err(e) => {
                error!("❌ Resolve submission for {} failed: {}", address, e);
                AttemptOutcome::Failed(e)
            }
        }
    }

    /// Attempt every contract the classifier reports as due. Safe to run concurrently with itself.
    pub async fn sweep(&self) -> AppResult<SweepReport> {
        let started_at = self.registry.clock().now();
        let due = self.registry.needs_resolution().await?;

        let report = if due.is_empty() {
            debug!("Sweep found nothing to resolve");
            SweepReport {
                aggregated: true,
                ..Default::default()
            }
        } else {
            info!("🔄 Sweep found {} contracts due for resolution", due.len());
            let report = self.resolve_batch(due).await;
            info!(
                "✓ Sweep complete: {} submitted, {} skipped, {} in flight, {} unreadable, {} failed",
                report.submitted, report.skipped, report.in_flight, report.unreadable, report.failed
            );
            report
        };

        *self.last_sweep.lock() = Some((started_at, report.clone()));
        Ok(report)
    }

    /// Sweep and report how many resolutions were submitted
    pub async fn resolve_expired_contracts(&self) -> AppResult<usize> {
        Ok(self.sweep().await?.submitted)
    }

    pub async fn get_status(&self) -> AppResult<SchedulerStatus> {
        let tracked_contracts = self.registry.all().await?.len();
        let last_sweep = self.last_sweep.lock().clone();

        Ok(SchedulerStatus {
            tracked_contracts,
            cached_contracts: self.registry.cache().size(),
            pending_timers: self.timers.pending_count(),
            in_flight: self.in_flight.lock().len(),
            last_sweep_at: last_sweep.as_ref().map(|(at, _)| *at),
            last_sweep: last_sweep.map(|(_, report)| report),
            aggregator_available: self.reader.batcher().last_known_availability(),
            store: self.registry.backend(),
        })
    }

    /// Rebuild timers after a restart, then sweep whatever expired while down
    pub async fn recover(&self) -> AppResult<SweepReport> {
        let now = self.registry.clock().unix_now();
        let mut armed = 0usize;

        for record in self.registry.awaiting_expiry().await? {
            if let Some(expiry) = record.expiry_timestamp {
                let due_at = expiry.saturating_add(1);
                // past-due contracts are picked up by the sweep below
                if due_at > now {
                    self.timers.arm(record.address, due_at);
                    armed += 1;
                }
            }
        }
        info!("♻️ Re-armed {} expiry timers", armed);

        self.sweep().await
    }

    /// Start the background loop: timer fires plus the periodic sweep
    pub fn start(self: Arc<Self>) -> AppResult<JoinHandle<()>> {
        let mut fires = self
            .fires
            .lock()
            .take()
            .ok_or_else(|| AppError::Internal("Expiry scheduler already started".into()))?;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(self.config.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // first tick completes immediately; recovery already swept
            ticker.tick().await;

            info!(
                "⏰ Expiry scheduler running (sweep every {}s)",
                self.config.sweep_interval.as_secs()
            );

            loop {
                tokio::select! {
                    Some(address) = fires.recv() => {
                        let scheduler = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = scheduler.on_timer_fire(address).await {
                                error!("❌ Timer-driven resolution of {} failed: {}", address, e);
                            }
                        });
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            error!("❌ Sweep failed: {}", e);
                        }
                    }
                }
            }
        });

        Ok(handle)
    }
}
