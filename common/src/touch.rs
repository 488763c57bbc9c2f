//! Debounced long-press detector for the capacitive wake pad.
//!
//! Touch readings drop when a finger is on the pad. A wake is only reported
//! once the reading has stayed below the threshold for the full hold
//! duration; any sample at or above the threshold restarts the hold.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TouchState {
    Idle,
    Holding { since_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct TouchWakeDetector {
    threshold: u16,
    hold_duration_ms: u64,
    state: TouchState,
}

impl TouchWakeDetector {
    pub fn new(threshold: u16, hold_duration_ms: u64) -> Self {
        Self {
            threshold,
            hold_duration_ms,
            state: TouchState::Idle,
        }
    }

    pub fn is_touched(&self, reading: u16) -> bool {
        reading < self.threshold
    }

    /// Feeds one sample. Returns `true` exactly once per completed hold.
    pub fn sample(&mut self, reading: u16, now_ms: u64) -> bool {
        if !self.is_touched(reading) {
            self.state = TouchState::Idle;
            return false;
        }

        match self.state {
            TouchState::Idle => {
                self.state = TouchState::Holding { since_ms: now_ms };
                false
            }
            TouchState::Holding { since_ms } => {
                if now_ms.saturating_sub(since_ms) >= self.hold_duration_ms {
                    self.state = TouchState::Idle;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = TouchState::Idle;
    }
}
