use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerState {
    Pending,
    Fired,
    Cancelled,
}

/// Expiry timer for one contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Timer {
    pub contract_address: Address,
    /// Unix seconds
    pub due_at: u64,
    pub state: TimerState,
}

struct Entry {
    timer: Timer,
    generation: u64,
    handle: JoinHandle<()>,
}

type Entries = Arc<Mutex<HashMap<Address, Entry>>>;

/// In-memory timers keyed by address.
///
/// Arming replaces any previous timer for the address, and a timer delivers
/// its address on the fire channel at most once.
pub struct TimerRegistry {
    entries: Entries,
    generation: AtomicU64,
    fires: mpsc::UnboundedSender<Address>,
    clock: Arc<dyn Clock>,
}

impl TimerRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> (Self, mpsc::UnboundedReceiver<Address>) {
        let (fires, rx) = mpsc::unbounded_channel();
        let registry = Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            fires,
            clock,
        };
        (registry, rx)
    }

    /// Arm (or re-arm) the timer for `address` to fire at unix time `due_at`
    pub fn arm(&self, address: Address, due_at: u64) {
        let delay = Duration::from_secs(due_at.saturating_sub(self.clock.unix_now()));
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let mut entries = self.entries.lock();
        if let Some(previous) = entries.remove(&address) {
            previous.handle.abort();
            debug!("Replaced timer for {} (was due {})", address, previous.timer.due_at);
        }
        // Fired and cancelled timers stay visible until the next arm
        entries.retain(|_, entry| entry.timer.state == TimerState::Pending);

        let handle = tokio::spawn(fire_after(
            self.entries.clone(),
            self.fires.clone(),
            address,
            generation,
            delay,
        ));

        entries.insert(
            address,
            Entry {
                timer: Timer {
                    contract_address: address,
                    due_at,
                    state: TimerState::Pending,
                },
                generation,
                handle,
            },
        );
        debug!("⏰ Timer armed for {} in {}s", address, delay.as_secs());
    }

    /// Cancel a pending timer. Returns whether one was pending.
    pub fn cancel(&self, address: Address) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(&address) {
            Some(entry) if entry.timer.state == TimerState::Pending => {
                entry.handle.abort();
                entry.timer.state = TimerState::Cancelled;
                debug!("Timer cancelled for {}", address);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, address: Address) -> Option<Timer> {
        self.entries.lock().get(&address).map(|e| e.timer.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|e| e.timer.state == TimerState::Pending)
            .count()
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        for entry in self.entries.lock().values() {
            entry.handle.abort();
        }
    }
}

async fn fire_after(
    entries: Entries,
    fires: mpsc::UnboundedSender<Address>,
    address: Address,
    generation: u64,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;

    let fire = {
        let mut entries = entries.lock();
        match entries.get_mut(&address) {
            Some(entry)
                if entry.generation == generation && entry.timer.state == TimerState::Pending =>
            {
                entry.timer.state = TimerState::Fired;
                true
            }
            _ => false,
        }
    };

    if fire {
        debug!("⏰ Timer fired for {}", address);
        let _ = fires.send(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use tokio::time::Instant;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once_at_due_time() {
        let (timers, mut rx) = TimerRegistry::new(Arc::new(MockClock::at(1_000)));
        let address = Address::repeat_byte(1);
        let start = Instant::now();

        timers.arm(address, 1_010);
        assert_eq!(timers.pending_count(), 1);

        tokio::time::advance(Duration::from_secs(9)).await;
        settle().await;
        assert!(rx.try_recv().is_err());

        assert_eq!(rx.recv().await, Some(address));
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert_eq!(timers.get(address).map(|t| t.state), Some(TimerState::Fired));
        assert_eq!(timers.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_keeps_only_latest_timer() {
        let (timers, mut rx) = TimerRegistry::new(Arc::new(MockClock::at(1_000)));
        let address = Address::repeat_byte(2);
        let start = Instant::now();

        timers.arm(address, 1_010);
        timers.arm(address, 1_020);
        assert_eq!(timers.pending_count(), 1);
        assert_eq!(timers.get(address).map(|t| t.due_at), Some(1_020));

        assert_eq!(rx.recv().await, Some(address));
        assert!(start.elapsed() >= Duration::from_secs(20));

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (timers, mut rx) = TimerRegistry::new(Arc::new(MockClock::at(1_000)));
        let address = Address::repeat_byte(3);

        timers.arm(address, 1_005);
        assert!(timers.cancel(address));
        assert!(!timers.cancel(address));

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(timers.get(address).map(|t| t.state), Some(TimerState::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_timers_are_pruned_on_next_arm() {
        let (timers, mut rx) = TimerRegistry::new(Arc::new(MockClock::at(1_000)));
        let fired = Address::repeat_byte(5);
        let cancelled = Address::repeat_byte(6);

        timers.arm(fired, 1_001);
        timers.arm(cancelled, 1_100);
        assert_eq!(rx.recv().await, Some(fired));
        assert!(timers.cancel(cancelled));

        let next = Address::repeat_byte(7);
        timers.arm(next, 1_200);

        assert_eq!(timers.get(fired), None);
        assert_eq!(timers.get(cancelled), None);
        assert_eq!(timers.entries.lock().len(), 1);
        assert_eq!(timers.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_due_timer_fires_immediately() {
        let (timers, mut rx) = TimerRegistry::new(Arc::new(MockClock::at(1_000)));
        let address = Address::repeat_byte(4);

        timers.arm(address, 900);

        assert_eq!(rx.recv().await, Some(address));
    }
}
