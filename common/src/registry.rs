use crate::{
    error::RelayError,
    types::{DeviceKind, DeviceView, Location},
};

pub const DEVICE_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    index: usize,
    on: bool,
}

impl Device {
    pub fn is_on(&self) -> bool {
        self.on
    }

    /// The first half of the table drives lights, the second half fans.
    pub fn kind(&self) -> DeviceKind {
        if self.index < DEVICE_COUNT / 2 {
            DeviceKind::Light
        } else {
            DeviceKind::Fan
        }
    }

    pub fn location(&self) -> Location {
        if self.index % 2 == 0 {
            Location::LivingRoom
        } else {
            Location::Bedroom
        }
    }

    pub fn label(&self) -> String {
        format!("{} ({})", self.kind().as_str(), self.location().as_str())
    }

    pub fn view(&self) -> DeviceView {
        DeviceView {
            index: self.index,
            kind: self.kind().as_str(),
            location: self.location().as_str(),
            on: self.on,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: [Device; DEVICE_COUNT],
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: core::array::from_fn(|index| Device { index, on: false }),
        }
    }

    pub fn toggle(&mut self, index: usize) -> Result<bool, RelayError> {
        let device = self
            .devices
            .get_mut(index)
            .ok_or(RelayError::OutOfRange {
                index: i64::try_from(index).unwrap_or(i64::MAX),
            })?;
        device.on = !device.on;
        Ok(device.on)
    }

    pub fn force_all_off(&mut self) {
        for device in &mut self.devices {
            device.on = false;
        }
    }

    pub fn snapshot(&self) -> [bool; DEVICE_COUNT] {
        self.devices.map(|device| device.on)
    }

    pub fn get(&self, index: usize) -> Option<&Device> {
        self.devices.get(index)
    }

    pub fn devices(&self) -> &[Device; DEVICE_COUNT] {
        &self.devices
    }
}
