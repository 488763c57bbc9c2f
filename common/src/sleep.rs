use crate::types::SystemMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepTransition {
    FellAsleep,
    WokeUp,
}

#[derive(Debug, Clone)]
pub struct SleepStateMachine {
    timeout_ms: u64,
    mode: SystemMode,
    last_activity_ms: u64,
}

impl SleepStateMachine {
    pub fn new(timeout_ms: u64, boot_ms: u64) -> Self {
        Self {
            timeout_ms,
            mode: SystemMode::Awake,
            last_activity_ms: boot_ms,
        }
    }

    pub fn mode(&self) -> SystemMode {
        self.mode
    }

    pub fn is_asleep(&self) -> bool {
        self.mode == SystemMode::Asleep
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }

    pub fn idle_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_activity_ms)
    }

    /// Time left before the idle timeout fires, zero while asleep.
    pub fn sleep_in_ms(&self, now_ms: u64) -> u64 {
        if self.is_asleep() {
            return 0;
        }
        self.timeout_ms.saturating_sub(self.idle_ms(now_ms))
    }

    pub fn record_activity(&mut self, now_ms: u64) {
        if !self.is_asleep() {
            self.last_activity_ms = now_ms;
        }
    }

    pub fn evaluate(&mut self, now_ms: u64) -> Option<SleepTransition> {
        if self.is_asleep() || self.idle_ms(now_ms) <= self.timeout_ms {
            return None;
        }

        self.mode = SystemMode::Asleep;
        Some(SleepTransition::FellAsleep)
    }

    pub fn wake(&mut self, now_ms: u64) -> Option<SleepTransition> {
        if !self.is_asleep() {
            return None;
        }

        self.mode = SystemMode::Awake;
        self.last_activity_ms = now_ms;
        Some(SleepTransition::WokeUp)
    }
}
