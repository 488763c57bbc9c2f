//! Status LED policy.
//!
//! Off while asleep. While awake the LED fast-blinks until the station link
//! comes up, and is solid once connected or when no link is configured.

pub const FAST_BLINK_MS: u64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No station credentials; the hub runs on touch control alone.
    Unconfigured,
    Connecting,
    Connected,
}

pub fn indicator_on(asleep: bool, link: LinkState, now_ms: u64) -> bool {
    if asleep {
        return false;
    }

    match link {
        LinkState::Unconfigured | LinkState::Connected => true,
        LinkState::Connecting => (now_ms / FAST_BLINK_MS) % 2 == 0,
    }
}
