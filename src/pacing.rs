use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::domain::SourceKind;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Minimum delay between consecutive requests to one source.
pub struct Pacer {
    source: SourceKind,
    min_interval: Duration,
    clock: Arc<dyn Clock>,
    last_request: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(source: SourceKind, min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            min_interval,
            clock,
            last_request: Mutex::new(None),
        }
    }

    pub fn system(source: SourceKind, min_interval: Duration) -> Self {
        Self::new(source, min_interval, Arc::new(SystemClock))
    }

    pub fn acquire(&self) {
        // Held across the sleep so two callers never claim the same slot.
        let mut last = self
            .last_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = *last {
            let elapsed = self.clock.now().saturating_duration_since(previous);
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(source = %self.source, wait_ms = wait.as_millis() as u64, "pacing");
                self.clock.sleep(wait);
            }
        }
        *last = Some(self.clock.now());
    }

    pub fn pause(&self, duration: Duration) {
        self.clock.sleep(duration);
    }
}

impl fmt::Debug for Pacer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pacer")
            .field("source", &self.source)
            .field("min_interval", &self.min_interval)
            .finish()
    }
}
