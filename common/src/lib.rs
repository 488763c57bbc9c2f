pub mod config;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod indicator;
pub mod observers;
pub mod registry;
pub mod routes;
pub mod sleep;
pub mod timer;
pub mod touch;
pub mod types;

pub use config::{HardwareConfig, HubConfig, NetworkConfig, RuntimeConfig};
pub use dispatch::{parse_command, Command};
pub use error::RelayError;
pub use hub::{HubAction, HubEvent, RelayHub};
pub use indicator::{indicator_on, LinkState};
pub use observers::{ObserverRequest, ObserverSet, ObserverSink};
pub use registry::{Device, DeviceRegistry, DEVICE_COUNT};
pub use routes::*;
pub use sleep::{SleepStateMachine, SleepTransition};
pub use timer::PeriodicTimer;
pub use touch::TouchWakeDetector;
pub use types::{DeviceKind, DeviceView, HubStatus, Location, OutboundMessage, SystemMode};
