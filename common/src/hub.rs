use crate::{
    config::HubConfig,
    dispatch::{parse_command, Command},
    error::RelayError,
    registry::{DeviceRegistry, DEVICE_COUNT},
    sleep::{SleepStateMachine, SleepTransition},
    touch::TouchWakeDetector,
    types::{HubStatus, OutboundMessage, SystemMode},
};

/// Side effects requested by the hub; the platform backend executes them in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubAction {
    SetRelay { index: usize, on: bool },
    SetIndicator(bool),
    Broadcast(OutboundMessage),
}

/// Inputs queued by the network side and consumed by the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    Command(Vec<u8>),
    ObserverJoined,
    ObserverLeft,
}

#[derive(Debug, Clone)]
pub struct RelayHub {
    pub config: HubConfig,
    registry: DeviceRegistry,
    sleep: SleepStateMachine,
    touch: TouchWakeDetector,
    observers: usize,
}

impl RelayHub {
    pub fn new(config: HubConfig, boot_ms: u64) -> Self {
        Self {
            registry: DeviceRegistry::new(),
            sleep: SleepStateMachine::new(config.sleep_timeout_ms, boot_ms),
            touch: TouchWakeDetector::new(config.touch_threshold, config.touch_wake_duration_ms),
            observers: 0,
            config,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn mode(&self) -> SystemMode {
        self.sleep.mode()
    }

    pub fn is_asleep(&self) -> bool {
        self.sleep.is_asleep()
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.sleep.last_activity_ms()
    }

    pub fn snapshot(&self) -> [bool; DEVICE_COUNT] {
        self.registry.snapshot()
    }

    pub fn observers(&self) -> usize {
        self.observers
    }

    pub fn states_message(&self) -> OutboundMessage {
        OutboundMessage::States {
            states: self.snapshot(),
        }
    }

    pub fn handle_event(
        &mut self,
        event: HubEvent,
        now_ms: u64,
    ) -> Result<Vec<HubAction>, RelayError> {
        match event {
            HubEvent::Command(raw) => self.apply_command(&raw, now_ms),
            HubEvent::ObserverJoined => {
                self.observers = self.observers.saturating_add(1);
                Ok(vec![HubAction::Broadcast(self.states_message())])
            }
            HubEvent::ObserverLeft => {
                self.observers = self.observers.saturating_sub(1);
                Ok(Vec::new())
            }
        }
    }

    pub fn apply_command(&mut self, raw: &[u8], now_ms: u64) -> Result<Vec<HubAction>, RelayError> {
        match parse_command(raw)? {
            Command::Toggle { relay } => self.apply_toggle(relay, now_ms),
        }
    }

    /// Toggles are refused while asleep so that sleeping always means all-off.
    pub fn apply_toggle(&mut self, index: usize, now_ms: u64) -> Result<Vec<HubAction>, RelayError> {
        if self.sleep.is_asleep() {
            return Err(RelayError::Asleep);
        }

        let on = self.registry.toggle(index)?;
        self.sleep.record_activity(now_ms);

        Ok(vec![
            HubAction::SetRelay { index, on },
            HubAction::Broadcast(self.states_message()),
        ])
    }

    /// One control-loop step. `touch_reading` is `None` when no sample was taken.
    pub fn tick(&mut self, now_ms: u64, touch_reading: Option<u16>) -> Vec<HubAction> {
        let mut actions = Vec::new();

        self.check_touch_wake(now_ms, touch_reading, &mut actions);
        self.check_idle_timeout(now_ms, &mut actions);

        actions
    }

    pub fn status(&self, now_ms: u64) -> HubStatus {
        HubStatus {
            mode: self.mode().as_str(),
            states: self.snapshot(),
            devices: self.registry.devices().iter().map(|device| device.view()).collect(),
            idle_ms: self.sleep.idle_ms(now_ms),
            sleep_in_ms: self.sleep.sleep_in_ms(now_ms),
            observers: self.observers,
        }
    }

    fn check_touch_wake(
        &mut self,
        now_ms: u64,
        touch_reading: Option<u16>,
        actions: &mut Vec<HubAction>,
    ) {
        if !self.sleep.is_asleep() {
            self.touch.reset();
            return;
        }

        let Some(reading) = touch_reading else {
            return;
        };

        if !self.touch.sample(reading, now_ms) {
            return;
        }

        if let Some(SleepTransition::WokeUp) = self.sleep.wake(now_ms) {
            actions.push(HubAction::SetIndicator(true));
        }
    }

    fn check_idle_timeout(&mut self, now_ms: u64, actions: &mut Vec<HubAction>) {
        if self.sleep.evaluate(now_ms) != Some(SleepTransition::FellAsleep) {
            return;
        }

        self.registry.force_all_off();
        for index in 0..DEVICE_COUNT {
            actions.push(HubAction::SetRelay { index, on: false });
        }
        actions.push(HubAction::SetIndicator(false));
        actions.push(HubAction::Broadcast(self.states_message()));
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const TIMEOUT_MS: u64 = 3_600_000;

    fn hub_at(boot_ms: u64) -> RelayHub {
        RelayHub::new(HubConfig::default(), boot_ms)
    }

    fn asleep_hub() -> RelayHub {
        let mut hub = hub_at(0);
        let _ = hub.tick(TIMEOUT_MS + 1, None);
        assert!(hub.is_asleep());
        hub
    }

    fn hold_touch(hub: &mut RelayHub, from_ms: u64, to_ms: u64, reading: u16) -> Vec<HubAction> {
        let mut actions = Vec::new();
        let mut now_ms = from_ms;
        while now_ms <= to_ms {
            actions.extend(hub.tick(now_ms, Some(reading)));
            now_ms += hub.config.tick_interval_ms;
        }
        actions
    }

    #[test]
    fn toggle_command_updates_registry_and_broadcasts() {
        let mut hub = hub_at(0);

        let actions = hub
            .handle_event(HubEvent::Command(br#"{"type":"toggle","relay":2}"#.to_vec()), 10)
            .expect("toggle accepted");

        assert_eq!(hub.snapshot(), [false, false, true, false]);
        assert_eq!(
            actions,
            vec![
                HubAction::SetRelay { index: 2, on: true },
                HubAction::Broadcast(OutboundMessage::States {
                    states: [false, false, true, false],
                }),
            ]
        );

        let HubAction::Broadcast(message) = &actions[1] else {
            panic!("expected broadcast");
        };
        assert_eq!(
            message.to_json().expect("serializes"),
            r#"{"type":"states","states":[false,false,true,false]}"#
        );
    }

    #[test]
    fn rejected_commands_leave_state_untouched() {
        let mut hub = hub_at(0);
        hub.apply_toggle(1, 5).expect("toggle accepted");
        let before = hub.snapshot();

        let payloads: [&[u8]; 4] = [
            br#"{"type":"toggle","relay":7}"#,
            br#"{"type":"reboot"}"#,
            b"{\"type\":",
            br#"{"type":"toggle","relay":-3}"#,
        ];
        for raw in payloads {
            assert!(hub.apply_command(raw, 1_000).is_err());
        }

        assert_eq!(hub.snapshot(), before);
        assert_eq!(hub.last_activity_ms(), 5);
    }

    #[test]
    fn toggles_refresh_activity() {
        let mut hub = hub_at(0);

        hub.apply_toggle(0, TIMEOUT_MS).expect("toggle accepted");
        assert!(hub.tick(TIMEOUT_MS + 1, None).is_empty());
        assert!(!hub.is_asleep());
        assert_eq!(hub.last_activity_ms(), TIMEOUT_MS);
    }

    #[test]
    fn idle_timeout_forces_everything_off_once() {
        let boot_ms = 1_000;
        let mut hub = hub_at(boot_ms);
        hub.apply_toggle(0, boot_ms).expect("toggle accepted");
        hub.apply_toggle(3, boot_ms).expect("toggle accepted");

        assert!(hub.tick(boot_ms + TIMEOUT_MS, None).is_empty());

        let actions = hub.tick(boot_ms + TIMEOUT_MS + 1, None);
        assert_eq!(hub.mode(), SystemMode::Asleep);
        assert_eq!(hub.snapshot(), [false; DEVICE_COUNT]);
        assert_eq!(
            actions,
            vec![
                HubAction::SetRelay { index: 0, on: false },
                HubAction::SetRelay { index: 1, on: false },
                HubAction::SetRelay { index: 2, on: false },
                HubAction::SetRelay { index: 3, on: false },
                HubAction::SetIndicator(false),
                HubAction::Broadcast(OutboundMessage::States {
                    states: [false; DEVICE_COUNT],
                }),
            ]
        );

        assert!(hub.tick(boot_ms + TIMEOUT_MS + 51, None).is_empty());
        assert!(hub.tick(boot_ms + 2 * TIMEOUT_MS, Some(100)).is_empty());
    }

    #[test]
    fn sustained_touch_wakes_without_restoring_devices() {
        let mut hub = asleep_hub();
        let touch_start = TIMEOUT_MS + 10_000;

        let actions = hold_touch(&mut hub, touch_start, touch_start + 3_000, 12);

        assert_eq!(actions, vec![HubAction::SetIndicator(true)]);
        assert_eq!(hub.mode(), SystemMode::Awake);
        assert_eq!(hub.last_activity_ms(), touch_start + 3_000);
        assert_eq!(hub.snapshot(), [false; DEVICE_COUNT]);
    }

    #[test]
    fn brief_touch_does_not_wake() {
        let mut hub = asleep_hub();
        let touch_start = TIMEOUT_MS + 10_000;

        assert!(hold_touch(&mut hub, touch_start, touch_start + 2_950, 12).is_empty());
        assert!(hub.tick(touch_start + 3_000, Some(80)).is_empty());
        assert!(hub.is_asleep());
    }

    #[test]
    fn touch_is_ignored_while_awake() {
        let mut hub = hub_at(0);

        assert!(hold_touch(&mut hub, 0, 10_000, 5).is_empty());
        assert_eq!(hub.mode(), SystemMode::Awake);
        assert_eq!(hub.last_activity_ms(), 0);
    }

    #[test]
    fn toggles_are_refused_while_asleep() {
        let mut hub = asleep_hub();

        assert_eq!(
            hub.apply_command(br#"{"type":"toggle","relay":1}"#, TIMEOUT_MS + 5),
            Err(RelayError::Asleep)
        );
        assert_eq!(hub.snapshot(), [false; DEVICE_COUNT]);
    }

    #[test]
    fn new_observer_receives_current_snapshot() {
        let mut hub = hub_at(0);
        hub.apply_toggle(1, 0).expect("toggle accepted");

        let actions = hub
            .handle_event(HubEvent::ObserverJoined, 1)
            .expect("join handled");

        assert_eq!(
            actions,
            vec![HubAction::Broadcast(OutboundMessage::States {
                states: [false, true, false, false],
            })]
        );
        assert_eq!(hub.observers(), 1);

        let _ = hub.handle_event(HubEvent::ObserverLeft, 2);
        let _ = hub.handle_event(HubEvent::ObserverLeft, 3);
        assert_eq!(hub.observers(), 0);
    }

    #[test]
    fn status_reports_devices_and_timers() {
        let mut hub = hub_at(0);
        hub.apply_toggle(2, 1_000).expect("toggle accepted");

        let status = hub.status(61_000);

        assert_eq!(status.mode, "AWAKE");
        assert_eq!(status.states, [false, false, true, false]);
        assert_eq!(status.idle_ms, 60_000);
        assert_eq!(status.sleep_in_ms, TIMEOUT_MS - 60_000);
        assert_eq!(status.devices[2].kind, "Fan");
        assert_eq!(status.devices[2].location, "Living Room");
        assert!(status.devices[2].on);
    }
}
