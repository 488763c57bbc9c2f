use serde::{Deserialize, Serialize};

use crate::registry::DEVICE_COUNT;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HubConfig {
    pub sleep_timeout_ms: u64,
    pub touch_wake_duration_ms: u64,
    pub touch_threshold: u16,
    pub tick_interval_ms: u64,
    pub wifi_check_interval_ms: u64,
    pub status_publish_interval_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            sleep_timeout_ms: 3_600_000,
            touch_wake_duration_ms: 3_000,
            touch_threshold: 40,
            tick_interval_ms: 50,
            wifi_check_interval_ms: 5_000,
            status_publish_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HardwareConfig {
    pub relay_pins: [i32; DEVICE_COUNT],
    pub status_led_pin: i32,
    pub touch_pad: u8,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            relay_pins: [16, 17, 18, 19],
            status_led_pin: 2,
            touch_pad: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub http_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            http_port: 80,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.hub.sanitize();
        self.hardware.sanitize();
        self.network.sanitize();
    }
}

impl HubConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        self.tick_interval_ms = self.tick_interval_ms.clamp(10, 1_000);
        // The wake hold must span at least a few ticks or a single noisy sample wakes the hub.
        self.touch_wake_duration_ms = self
            .touch_wake_duration_ms
            .clamp(self.tick_interval_ms * 2, 60_000);
        if self.sleep_timeout_ms == 0 {
            self.sleep_timeout_ms = defaults.sleep_timeout_ms;
        }
        if self.touch_threshold == 0 {
            self.touch_threshold = defaults.touch_threshold;
        }
        self.wifi_check_interval_ms = self.wifi_check_interval_ms.clamp(1_000, 600_000);
        self.status_publish_interval_ms = self.status_publish_interval_ms.clamp(100, 60_000);
    }
}

impl HardwareConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        for (pin, fallback) in self.relay_pins.iter_mut().zip(defaults.relay_pins) {
            if *pin < 0 {
                *pin = fallback;
            }
        }

        if self.status_led_pin < 0 {
            self.status_led_pin = defaults.status_led_pin;
        }

        // ESP32 exposes touch pads T0..T9.
        if self.touch_pad > 9 {
            self.touch_pad = defaults.touch_pad;
        }
    }

    pub fn has_duplicate_pins(&self) -> bool {
        let mut pins = self.relay_pins.to_vec();
        pins.push(self.status_led_pin);
        pins.sort_unstable();
        pins.windows(2).any(|pair| pair[0] == pair[1])
    }
}

impl NetworkConfig {
    pub fn sanitize(&mut self) {
        self.wifi_ssid = self.wifi_ssid.trim().to_string();
        if self.http_port == 0 {
            self.http_port = 80;
        }
    }

    pub fn has_station_credentials(&self) -> bool {
        let ssid = self.wifi_ssid.trim();
        !ssid.is_empty() && ssid != "CHANGE_ME"
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_reference_timing() {
        let config = HubConfig::default();

        assert_eq!(config.sleep_timeout_ms, 3_600_000);
        assert_eq!(config.touch_wake_duration_ms, 3_000);
        assert_eq!(config.touch_threshold, 40);
        assert_eq!(config.tick_interval_ms, 50);
        assert_eq!(config.wifi_check_interval_ms, 5_000);
    }

    #[test]
    fn sanitize_repairs_negative_pins() {
        let mut hardware = HardwareConfig {
            relay_pins: [16, -1, 18, -7],
            status_led_pin: -2,
            touch_pad: 12,
        };
        hardware.sanitize();

        assert_eq!(hardware, HardwareConfig::default());
    }

    #[test]
    fn sanitize_keeps_wake_hold_above_tick() {
        let mut config = HubConfig {
            tick_interval_ms: 200,
            touch_wake_duration_ms: 100,
            sleep_timeout_ms: 0,
            ..HubConfig::default()
        };
        config.sanitize();

        assert_eq!(config.touch_wake_duration_ms, 400);
        assert_eq!(config.sleep_timeout_ms, 3_600_000);
    }

    #[test]
    fn duplicate_pins_are_detected() {
        let mut hardware = HardwareConfig::default();
        assert!(!hardware.has_duplicate_pins());

        hardware.status_led_pin = 17;
        assert!(hardware.has_duplicate_pins());
    }

    #[test]
    fn partial_json_falls_back_to_section_defaults() {
        let runtime: RuntimeConfig =
            serde_json::from_str(r#"{"network":{"wifi_ssid":" home ","wifi_pass":"pw","http_port":0}}"#)
                .expect("runtime config parses");
        let mut runtime = runtime;
        runtime.sanitize();

        assert_eq!(runtime.network.wifi_ssid, "home");
        assert_eq!(runtime.network.http_port, 80);
        assert_eq!(runtime.hub, HubConfig::default());
        assert!(runtime.network.has_station_credentials());
    }

    #[test]
    fn single_knob_override_keeps_other_sections() {
        let runtime: RuntimeConfig = serde_json::from_str(
            r#"{"hub":{"sleep_timeout_ms":60000},"network":{"wifi_ssid":"home","wifi_pass":"secret"}}"#,
        )
        .expect("runtime config parses");

        assert_eq!(runtime.hub.sleep_timeout_ms, 60_000);
        assert_eq!(runtime.hub.touch_threshold, 40);
        assert_eq!(runtime.hub.tick_interval_ms, 50);
        assert_eq!(runtime.network.wifi_ssid, "home");
        assert_eq!(runtime.network.wifi_pass, "secret");
        assert_eq!(runtime.network.http_port, 80);
        assert_eq!(runtime.hardware, HardwareConfig::default());
    }

    #[test]
    fn partial_hardware_section_fills_missing_pins() {
        let runtime: RuntimeConfig =
            serde_json::from_str(r#"{"hardware":{"touch_pad":3}}"#).expect("runtime config parses");

        assert_eq!(runtime.hardware.touch_pad, 3);
        assert_eq!(runtime.hardware.relay_pins, [16, 17, 18, 19]);
        assert_eq!(runtime.hardware.status_led_pin, 2);
    }
}
