use serde::{Deserialize, Serialize};

use crate::registry::DEVICE_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceKind {
    Light,
    Fan,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "Light",
            Self::Fan => "Fan",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Location {
    LivingRoom,
    Bedroom,
}

impl Location {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LivingRoom => "Living Room",
            Self::Bedroom => "Bedroom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SystemMode {
    Awake,
    Asleep,
}

impl SystemMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Awake => "AWAKE",
            Self::Asleep => "ASLEEP",
        }
    }
}

/// Messages pushed to every connected observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    States { states: [bool; DEVICE_COUNT] },
}

impl OutboundMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceView {
    pub index: usize,
    pub kind: &'static str,
    pub location: &'static str,
    pub on: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubStatus {
    pub mode: &'static str,
    pub states: [bool; DEVICE_COUNT],
    pub devices: Vec<DeviceView>,
    #[serde(rename = "idleMs")]
    pub idle_ms: u64,
    #[serde(rename = "sleepInMs")]
    pub sleep_in_ms: u64,
    pub observers: usize,
}
