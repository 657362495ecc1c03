use std::time::{Duration, Instant};

/// Admits at most one scene write per `interval`.
#[derive(Debug, Clone)]
pub struct RenderThrottle {
    interval: Duration,
    last_applied: Option<Instant>,
}

impl RenderThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_applied: None,
        }
    }

    /// Returns true when a write is due, and records `now` as the last applied time.
    pub fn should_apply(&mut self, now: Instant) -> bool {
        let due = match self.last_applied {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last_applied = Some(now);
        }
        due
    }
}
