use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock time in whole Unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

#[cfg(test)]
pub mod manual {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::Clock;

    pub struct ManualClock(AtomicU64);

    impl ManualClock {
        pub fn new(now: u64) -> Self {
            ManualClock(AtomicU64::new(now))
        }

        pub fn set(&self, now: u64) {
            self.0.store(now, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }
}
