use chrono::{DateTime, Utc};

/// Wall-clock source shared by the registry, cache and scheduler
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current time as unix seconds, the unit contract expiries use
    fn unix_now(&self) -> u64 {
        self.now().timestamp().max(0) as u64
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests
#[cfg(test)]
#[derive(Debug)]
pub struct MockClock {
    secs: std::sync::atomic::AtomicI64,
}

#[cfg(test)]
impl MockClock {
    pub fn at(unix_secs: i64) -> Self {
        Self {
            secs: std::sync::atomic::AtomicI64::new(unix_secs),
        }
    }

    pub fn advance(&self, secs: i64) {
        self.secs
            .fetch_add(secs, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        use chrono::TimeZone;

        let secs = self.secs.load(std::sync::atomic::Ordering::SeqCst);
        Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
    }
}
