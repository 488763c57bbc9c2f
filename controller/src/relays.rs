use anyhow::anyhow;
use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};
use log::{info, warn};

use relayhub_common::{HardwareConfig, DEVICE_COUNT};

type OutputDriver = PinDriver<'static, AnyOutputPin, Output>;

/// Active-high relay outputs, one per device index.
pub struct RelayBank {
    pins: [i32; DEVICE_COUNT],
    drivers: [Option<OutputDriver>; DEVICE_COUNT],
}

impl RelayBank {
    pub fn new(hardware: &HardwareConfig) -> Self {
        let drivers = hardware.relay_pins.map(|pin| match init_output(pin) {
            Ok(driver) => Some(driver),
            Err(err) => {
                warn!("relay output unavailable on GPIO{pin}: {err:#}");
                None
            }
        });

        info!("relay outputs on GPIO {:?}", hardware.relay_pins);
        Self {
            pins: hardware.relay_pins,
            drivers,
        }
    }

    pub fn set(&mut self, index: usize, on: bool) -> anyhow::Result<()> {
        let pin = self
            .pins
            .get(index)
            .copied()
            .ok_or_else(|| anyhow!("no relay at index {index}"))?;
        let driver = self
            .drivers
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or_else(|| anyhow!("relay GPIO{pin} was not initialized"))?;

        if on {
            driver.set_high()?;
        } else {
            driver.set_low()?;
        }
        Ok(())
    }
}

pub struct StatusLed {
    pin: OutputDriver,
    lit: bool,
}

impl StatusLed {
    pub fn new(pin: i32) -> Option<Self> {
        match init_output(pin) {
            Ok(driver) => Some(Self {
                pin: driver,
                lit: false,
            }),
            Err(err) => {
                warn!("status LED unavailable on GPIO{pin}: {err:#}");
                None
            }
        }
    }

    pub fn drive(&mut self, on: bool) {
        if on == self.lit {
            return;
        }

        let result = if on {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };

        if let Err(err) = result {
            warn!("failed to drive status LED: {err}");
        } else {
            self.lit = on;
        }
    }
}

fn init_output(pin: i32) -> anyhow::Result<OutputDriver> {
    if pin < 0 {
        return Err(anyhow!("invalid GPIO {pin}"));
    }
    // Pin numbers come from sanitized config and are only claimed once at startup.
    let mut driver = PinDriver::output(unsafe { AnyOutputPin::new(pin) })?;
    driver.set_low()?;
    Ok(driver)
}
