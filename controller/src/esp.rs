use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError},
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::Method,
    io::Write,
    wifi::{AuthMethod, ClientConfiguration, Configuration},
    ws::FrameType,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::server::{
        ws::{EspHttpWsConnection, EspHttpWsDetachedSender},
        Configuration as HttpConfiguration, EspHttpServer,
    },
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    sys::{EspError, ESP_ERR_INVALID_SIZE, ESP_ERR_NO_MEM},
    wifi::{BlockingWifi, EspWifi},
};
use log::{debug, info, warn};

use relayhub_common::{
    dispatch::MAX_COMMAND_BYTES, indicator_on, HubAction, HubEvent, HubStatus, LinkState,
    NetworkConfig, ObserverRequest, ObserverSet, ObserverSink, PeriodicTimer, RelayHub,
    RuntimeConfig, ASSET_FAN_ICON, ASSET_INDEX, ASSET_LIGHT_ICON, ASSET_SCRIPT, ASSET_STYLE,
    ROUTE_STATUS, ROUTE_WS,
};

use crate::{
    relays::{RelayBank, StatusLed},
    touch::TouchPad,
};

const NVS_NAMESPACE: &str = "relayhub";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const EVENT_QUEUE_DEPTH: usize = 16;
const MAX_WS_FRAME_BYTES: usize = 1024;
const WATCHDOG_TIMEOUT_SEC: u32 = 30;

const INDEX_HTML: &str = include_str!("../web/index.html");
const SCRIPT_JS: &str = include_str!("../web/script.js");
const STYLE_CSS: &str = include_str!("../web/style.css");
const LIGHT_BULB_PNG: &[u8] = include_bytes!("../web/light-bulb.png");
const FAN_PNG: &[u8] = include_bytes!("../web/fan.png");

/// Everything the httpd thread hands to the control thread. The observer table
/// lives on the control thread only.
enum ControlEvent {
    Hub(HubEvent),
    Observer(ObserverRequest<WsObserver>),
}

struct WsObserver(EspHttpWsDetachedSender);

impl ObserverSink for WsObserver {
    fn deliver(&mut self, text: &str) -> bool {
        if self.0.is_closed() {
            return false;
        }
        match self.0.send(FrameType::Text(false), text.as_bytes()) {
            Ok(()) => true,
            Err(err) => {
                debug!("WebSocket send failed: {err}");
                false
            }
        }
    }
}

#[derive(Clone)]
struct SharedState {
    events: SyncSender<ControlEvent>,
    status: Arc<Mutex<HubStatus>>,
    wifi_connected: Arc<AtomicBool>,
}

struct NvsStore {
    partition: EspDefaultNvsPartition,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
    };

    let mut runtime = nvs_store.load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();
    ensure_wifi_defaults(&mut runtime);

    info!(
        "config loaded: ssid=`{}`, relays={:?}, led=GPIO{}, touch=T{}",
        runtime.network.wifi_ssid,
        runtime.hardware.relay_pins,
        runtime.hardware.status_led_pin,
        runtime.hardware.touch_pad,
    );
    if runtime.hardware.has_duplicate_pins() {
        warn!("relay/indicator pin assignments overlap; outputs may fight each other");
    }

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;

    // Device control comes up before the network so relays are driven low immediately.
    let relays = RelayBank::new(&runtime.hardware);
    let status_led = StatusLed::new(runtime.hardware.status_led_pin);
    let touch_pad = match TouchPad::new(runtime.hardware.touch_pad) {
        Ok(pad) => Some(pad),
        Err(err) => {
            warn!("touch wake disabled: {err:#}");
            None
        }
    };

    let (events_tx, events_rx) = mpsc::sync_channel(EVENT_QUEUE_DEPTH);
    let hub = RelayHub::new(runtime.hub.clone(), monotonic_ms());
    let shared_state = SharedState {
        events: events_tx,
        status: Arc::new(Mutex::new(hub.status(monotonic_ms()))),
        wifi_connected: Arc::new(AtomicBool::new(false)),
    };

    spawn_control_loop(
        hub,
        relays,
        touch_pad,
        status_led,
        events_rx,
        shared_state.clone(),
        runtime.network.has_station_credentials(),
    )?;

    let Peripherals { modem, .. } = Peripherals::take()?;
    match start_wifi(modem, sys_loop, nvs_partition, &runtime.network)? {
        Some(wifi) => {
            shared_state
                .wifi_connected
                .store(wifi.is_connected().unwrap_or(false), Ordering::Relaxed);
            disable_wifi_power_save();
            spawn_link_watchdog(
                wifi,
                shared_state.clone(),
                runtime.hub.wifi_check_interval_ms,
            )?;
        }
        None => warn!("wifi credentials missing; running with touch control only"),
    }

    let server = create_http_server(shared_state, runtime.network.http_port)?;

    // Keep services alive for the program lifetime.
    let _server = server;

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn ensure_wifi_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            runtime.network.wifi_ssid = ssid.to_string();
        }
    }

    if runtime.network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            runtime.network.wifi_pass = pass.to_string();
        }
    }
}

fn create_http_server(state: SharedState, port: u16) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        http_port: port,
        stack_size: 10 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    // Assets are optional: a failure here must not take device control down with it.
    if let Err(err) = register_static_assets(&mut server) {
        warn!("static asset routes unavailable: {err:#}");
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>(ROUTE_STATUS, Method::Get, move |req| {
            let status = lock(&state.status).clone();
            let body = serde_json::to_vec(&status)?;
            req.into_response(
                200,
                Some("OK"),
                &[("Content-Type", "application/json; charset=utf-8")],
            )?
            .write_all(&body)?;
            Ok(())
        })?;
    }

    server.ws_handler(ROUTE_WS, move |ws: &mut EspHttpWsConnection| {
        handle_ws_frame(&state, ws)
    })?;

    info!("http server listening on port {port}");
    Ok(server)
}

fn register_static_assets(server: &mut EspHttpServer<'static>) -> anyhow::Result<()> {
    let assets: [(&str, &str, &'static [u8]); 5] = [
        (ASSET_INDEX, "text/html", INDEX_HTML.as_bytes()),
        (ASSET_STYLE, "text/css", STYLE_CSS.as_bytes()),
        (ASSET_SCRIPT, "text/javascript", SCRIPT_JS.as_bytes()),
        (ASSET_LIGHT_ICON, "image/png", LIGHT_BULB_PNG),
        (ASSET_FAN_ICON, "image/png", FAN_PNG),
    ];

    for (path, content_type, body) in assets {
        server
            .fn_handler::<anyhow::Error, _>(path, Method::Get, move |req| {
                req.into_response(200, Some("OK"), &[("Content-Type", content_type)])?
                    .write_all(body)?;
                Ok(())
            })
            .with_context(|| format!("failed to register {path}"))?;
    }
    Ok(())
}

fn handle_ws_frame(state: &SharedState, ws: &mut EspHttpWsConnection) -> Result<(), EspError> {
    let session = ws.session();

    if ws.is_new() {
        let sink = WsObserver(ws.create_detached_sender()?);
        info!("WebSocket client #{session} connected");
        // An observer the control loop never learns about would get no updates; close it instead.
        if !enqueue(state, ControlEvent::Observer(ObserverRequest::Attach { session, sink })) {
            return Err(EspError::from_infallible::<ESP_ERR_NO_MEM>());
        }
        return Ok(());
    }

    if ws.is_closed() {
        info!("WebSocket client #{session} disconnected");
        enqueue(state, ControlEvent::Observer(ObserverRequest::Detach { session }));
        return Ok(());
    }

    let (frame_type, len) = ws.recv(&mut [])?;
    if len > MAX_WS_FRAME_BYTES {
        warn!("closing WebSocket client #{session}: {len} byte frame");
        return Err(EspError::from_infallible::<ESP_ERR_INVALID_SIZE>());
    }

    let mut frame = vec![0_u8; len];
    ws.recv(&mut frame)?;

    // Only complete text frames carry commands.
    if !matches!(frame_type, FrameType::Text(false)) {
        return Ok(());
    }

    // httpd NUL-terminates text payloads.
    while frame.last() == Some(&0) {
        frame.pop();
    }
    if frame.len() > MAX_COMMAND_BYTES {
        debug!("dropping oversized command from client #{session}");
        return Ok(());
    }

    enqueue(state, ControlEvent::Hub(HubEvent::Command(frame)));
    Ok(())
}

/// Never blocks: the httpd thread must stay free to flush pending sends.
fn enqueue(state: &SharedState, event: ControlEvent) -> bool {
    match state.events.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            debug!("control event queue full; dropping event");
            false
        }
        Err(TrySendError::Disconnected(_)) => {
            warn!("control event queue closed");
            false
        }
    }
}

fn start_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<Option<BlockingWifi<EspWifi<'static>>>> {
    if !network.has_station_credentials() {
        return Ok(None);
    }

    let esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start().context("failed to start wifi")?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    // The link watchdog keeps retrying, so a failed first attempt is not fatal.
    if let Err(err) = connect_station(&mut wifi) {
        warn!("initial wifi connect failed: {err:#}");
    }

    Ok(Some(wifi))
}

fn connect_station(wifi: &mut BlockingWifi<EspWifi<'static>>) -> anyhow::Result<()> {
    wifi.connect().context("wifi connect failed")?;
    wifi.wait_netif_up().context("wifi netif did not come up")?;

    let ip_info = wifi.wifi().sta_netif().get_ip_info()?;
    info!("connected to wifi, IP address {}", ip_info.ip);
    Ok(())
}

fn spawn_link_watchdog(
    mut wifi: BlockingWifi<EspWifi<'static>>,
    state: SharedState,
    check_interval_ms: u64,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("wifi-link".into())
        .stack_size(6 * 1024)
        .spawn(move || {
            let mut check = PeriodicTimer::new(check_interval_ms);

            loop {
                if check.poll(monotonic_ms()) {
                    let mut connected = wifi.is_connected().unwrap_or(false);
                    if !connected {
                        state.wifi_connected.store(false, Ordering::Relaxed);
                        warn!("wifi connection lost, reconnecting");
                        let _ = wifi.disconnect();
                        match connect_station(&mut wifi) {
                            Ok(()) => connected = true,
                            Err(err) => warn!("wifi reconnect failed: {err:#}"),
                        }
                    }
                    state.wifi_connected.store(connected, Ordering::Relaxed);
                }

                let wait_ms = check.remaining_ms(monotonic_ms()).max(100);
                thread::sleep(Duration::from_millis(wait_ms));
            }
        })
        .context("failed to spawn wifi link thread")?;
    Ok(())
}

fn spawn_control_loop(
    mut hub: RelayHub,
    mut relays: RelayBank,
    mut touch_pad: Option<TouchPad>,
    mut status_led: Option<StatusLed>,
    events: Receiver<ControlEvent>,
    state: SharedState,
    link_configured: bool,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("control-loop".into())
        .stack_size(8 * 1024)
        .spawn(move || {
            if let Err(err) = add_current_task_to_watchdog() {
                warn!("failed to register control loop with watchdog: {err:#}");
            }

            let mut observers = ObserverSet::new();
            let mut tick_timer = PeriodicTimer::new(hub.config.tick_interval_ms);
            let mut status_timer = PeriodicTimer::new(hub.config.status_publish_interval_ms);

            loop {
                feed_watchdog();

                let wait = Duration::from_millis(tick_timer.remaining_ms(monotonic_ms()));
                let event = match events.recv_timeout(wait) {
                    Ok(ControlEvent::Hub(event)) => Some(event),
                    Ok(ControlEvent::Observer(request)) => observers.apply(request),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => {
                        warn!("hub event queue closed; stopping control loop");
                        break;
                    }
                };

                let mut actions = match event.map(|event| hub.handle_event(event, monotonic_ms())) {
                    Some(Ok(actions)) => actions,
                    Some(Err(err)) => {
                        debug!("discarding command: {err}");
                        Vec::new()
                    }
                    None => Vec::new(),
                };

                let now_ms = monotonic_ms();
                if tick_timer.poll(now_ms) {
                    let reading = if hub.is_asleep() {
                        touch_pad.as_mut().and_then(TouchPad::read)
                    } else {
                        None
                    };
                    actions.extend(hub.tick(now_ms, reading));

                    let link = if !link_configured {
                        LinkState::Unconfigured
                    } else if state.wifi_connected.load(Ordering::Relaxed) {
                        LinkState::Connected
                    } else {
                        LinkState::Connecting
                    };
                    if let Some(led) = status_led.as_mut() {
                        led.drive(indicator_on(hub.is_asleep(), link, now_ms));
                    }
                }

                let changed = !actions.is_empty();
                execute_hub_actions(&mut hub, &mut relays, &mut observers, actions);

                if changed || status_timer.poll(now_ms) {
                    *lock(&state.status) = hub.status(now_ms);
                }
            }
        })
        .context("failed to spawn control loop thread")?;
    Ok(())
}

fn execute_hub_actions(
    hub: &mut RelayHub,
    relays: &mut RelayBank,
    observers: &mut ObserverSet<WsObserver>,
    actions: Vec<HubAction>,
) {
    if actions.contains(&HubAction::SetIndicator(false)) {
        info!("=== Entering sleep mode, turning off all devices ===");
    }

    for action in actions {
        match action {
            HubAction::SetRelay { index, on } => {
                let label = hub
                    .registry()
                    .get(index)
                    .map(|device| device.label())
                    .unwrap_or_else(|| format!("relay {index}"));
                let status = if on { "ON" } else { "OFF" };

                if let Err(err) = relays.set(index, on) {
                    warn!("Device: {label} -> {status} failed: {err:#}");
                } else {
                    info!("Device: {label} -> {status}");
                }
            }
            // The LED itself follows `indicator_on`, which also tracks the wifi link.
            HubAction::SetIndicator(true) => info!("=== Waking up from sleep mode ==="),
            HubAction::SetIndicator(false) => {}
            HubAction::Broadcast(message) => match message.to_json() {
                Ok(body) => {
                    for session in observers.broadcast(&body) {
                        debug!("dropping WebSocket client #{session}");
                        let _ = hub.handle_event(HubEvent::ObserverLeft, monotonic_ms());
                    }
                }
                Err(err) => warn!("state serialization failed: {err}"),
            },
        }
    }
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 2048];

        match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
            None => Ok(RuntimeConfig::default()),
        }
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
