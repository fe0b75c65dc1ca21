use std::time::Duration;

use tokio::time::Instant;

const FIRST_IDLE_REPORT: Duration = Duration::from_secs(60);

/// Reports idle time at 1, 2, 4, ... minute marks.
#[derive(Debug, Clone)]
pub struct IdleTracker {
    since: Instant,
    next_report: Duration,
}

impl IdleTracker {
    pub fn new(now: Instant) -> Self {
        Self {
            since: now,
            next_report: FIRST_IDLE_REPORT,
        }
    }

    pub fn reset(&mut self, now: Instant) {
        self.since = now;
        self.next_report = FIRST_IDLE_REPORT;
    }

    /// Returns the idle time when a reporting mark has just been passed.
    pub fn observe(&mut self, now: Instant) -> Option<Duration> {
        let idle = now.saturating_duration_since(self.since);
        if idle < self.next_report {
            return None;
        }
        while self.next_report <= idle {
            self.next_report *= 2;
        }
        Some(idle)
    }
}
