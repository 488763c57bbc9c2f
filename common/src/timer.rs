/// Fixed-period timer driven by an external monotonic clock.
#[derive(Debug, Clone)]
pub struct PeriodicTimer {
    period_ms: u64,
    last_fired_ms: Option<u64>,
}

impl PeriodicTimer {
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms,
            last_fired_ms: None,
        }
    }

    /// Fires on the first poll, then whenever a full period has elapsed.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        let due = self
            .last_fired_ms
            .map(|last| now_ms.saturating_sub(last) >= self.period_ms)
            .unwrap_or(true);

        if due {
            self.last_fired_ms = Some(now_ms);
        }
        due
    }

    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        match self.last_fired_ms {
            Some(last) => self
                .period_ms
                .saturating_sub(now_ms.saturating_sub(last)),
            None => 0,
        }
    }
}
