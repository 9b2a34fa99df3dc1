//! Injectable time source for sync throttling and record timestamps

use chrono::NaiveDateTime;
use std::sync::{Arc, RwLock};

/// Time source used wherever the engine needs the current instant
///
/// Injecting the clock keeps throttling decisions and created-at stamps
/// deterministic under test.
pub trait Clock: Send + Sync {
    /// The current instant
    fn now(&self) -> NaiveDateTime;
}

/// Production clock backed by the system time
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }
}

/// Manually controlled clock for tests
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<NaiveDateTime>>,
}

impl ManualClock {
    /// Create a clock frozen at the given instant
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    /// Jump the clock to a specific instant
    pub fn set(&self, at: NaiveDateTime) {
        *self.now.write().unwrap() = at;
    }

    /// Move the clock forward
    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.write().unwrap();
        *guard = *guard + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.read().unwrap()
    }
}
