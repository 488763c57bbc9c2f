use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicU16, AtomicU64, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc, watch},
    time::MissedTickBehavior,
};
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use relayhub_common::{
    HubAction, HubEvent, HubStatus, PeriodicTimer, RelayHub, RuntimeConfig, DEVICE_COUNT,
    ROUTE_STATUS, ROUTE_TOUCH, ROUTE_WS,
};

const EVENT_QUEUE_DEPTH: usize = 32;
const BROADCAST_DEPTH: usize = 16;
const UNTOUCHED_READING: u16 = u16::MAX;

#[derive(Clone)]
struct AppState {
    events: mpsc::Sender<HubEvent>,
    observers: broadcast::Sender<String>,
    status: watch::Receiver<HubStatus>,
    touch_reading: Arc<AtomicU16>,
    touch_threshold: u16,
    next_observer_id: Arc<AtomicU64>,
}

struct AppStore {
    runtime_path: PathBuf,
}

/// Stand-in for the relay and indicator GPIOs when running off-target.
struct SimulatedOutputs {
    relay_pins: [i32; DEVICE_COUNT],
    relays: [bool; DEVICE_COUNT],
    indicator: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct TouchView {
    reading: u16,
    threshold: u16,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();
    if runtime.hardware.has_duplicate_pins() {
        warn!("relay/indicator pin assignments overlap: {:?}", runtime.hardware);
    }

    let hub = RelayHub::new(runtime.hub.clone(), monotonic_ms());

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let (observers_tx, _) = broadcast::channel(BROADCAST_DEPTH);
    let (status_tx, status_rx) = watch::channel(hub.status(monotonic_ms()));

    let app_state = AppState {
        events: events_tx,
        observers: observers_tx.clone(),
        status: status_rx,
        touch_reading: Arc::new(AtomicU16::new(UNTOUCHED_READING)),
        touch_threshold: hub.config.touch_threshold,
        next_observer_id: Arc::new(AtomicU64::new(1)),
    };

    let outputs = SimulatedOutputs::new(runtime.hardware.relay_pins);
    spawn_control_loop(
        hub,
        outputs,
        events_rx,
        observers_tx,
        status_tx,
        app_state.touch_reading.clone(),
    );

    let mut app = Router::new()
        .route(ROUTE_WS, get(handle_ws))
        .route(ROUTE_STATUS, get(handle_get_status))
        .route(ROUTE_TOUCH, get(handle_get_touch).post(handle_set_touch));

    let web_root = std::env::var("RELAYHUB_WEB_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(format!("{}/web", env!("CARGO_MANIFEST_DIR"))));
    if web_root.is_dir() {
        app = app.fallback_service(ServeDir::new(&web_root));
    } else {
        warn!(
            "static assets unavailable at {}; serving device control only",
            web_root.display()
        );
    }
    let app = app.with_state(app_state);

    let port = std::env::var("RELAYHUB_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("relay hub listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn spawn_control_loop(
    mut hub: RelayHub,
    mut outputs: SimulatedOutputs,
    mut events: mpsc::Receiver<HubEvent>,
    observers: broadcast::Sender<String>,
    status: watch::Sender<HubStatus>,
    touch_reading: Arc<AtomicU16>,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(hub.config.tick_interval_ms));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut status_timer = PeriodicTimer::new(hub.config.status_publish_interval_ms);

        outputs.set_indicator(true);

        loop {
            let (now_ms, actions) = tokio::select! {
                _ = tick.tick() => {
                    let now_ms = monotonic_ms();
                    let reading = touch_reading.load(Ordering::Relaxed);
                    (now_ms, hub.tick(now_ms, Some(reading)))
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        warn!("hub event queue closed; stopping control loop");
                        break;
                    };
                    let now_ms = monotonic_ms();
                    match hub.handle_event(event, now_ms) {
                        Ok(actions) => (now_ms, actions),
                        Err(err) => {
                            debug!("discarding command: {err}");
                            (now_ms, Vec::new())
                        }
                    }
                }
            };

            let changed = !actions.is_empty();
            execute_hub_actions(&hub, &mut outputs, &observers, actions);

            if changed || status_timer.poll(now_ms) {
                status.send_replace(hub.status(now_ms));
            }
        }
    });
}

fn execute_hub_actions(
    hub: &RelayHub,
    outputs: &mut SimulatedOutputs,
    observers: &broadcast::Sender<String>,
    actions: Vec<HubAction>,
) {
    if actions.contains(&HubAction::SetIndicator(false)) {
        info!("=== Entering sleep mode, turning off all devices ===");
    }

    for action in actions {
        match action {
            HubAction::SetRelay { index, on } => {
                outputs.set_relay(index, on);
                if let Some(device) = hub.registry().get(index) {
                    let status = if on { "ON" } else { "OFF" };
                    info!("Device: {} -> {status}", device.label());
                }
            }
            HubAction::SetIndicator(on) => {
                if on {
                    info!("=== Waking up from sleep mode ===");
                }
                outputs.set_indicator(on);
            }
            HubAction::Broadcast(message) => match message.to_json() {
                // A send error only means no observer is connected right now.
                Ok(body) => {
                    let _ = observers.send(body);
                }
                Err(err) => warn!("state serialization failed: {err}"),
            },
        }
    }
}

async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| observer_session(state, socket))
}

async fn observer_session(state: AppState, mut socket: WebSocket) {
    let id = state.next_observer_id.fetch_add(1, Ordering::Relaxed);
    // Subscribe before announcing the join so the snapshot broadcast reaches this client.
    let mut rx = state.observers.subscribe();
    info!("WebSocket client #{id} connected");

    if state.events.send(HubEvent::ObserverJoined).await.is_err() {
        warn!("hub event queue closed; dropping client #{id}");
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let raw = text.as_str().as_bytes().to_vec();
                        if state.events.send(HubEvent::Command(raw)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        debug!("WebSocket client #{id} read error: {err}");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            outgoing = rx.recv() => {
                match outgoing {
                    Ok(body) => {
                        if socket.send(Message::Text(body.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("WebSocket client #{id} skipped {skipped} stale snapshots");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    let _ = socket.send(Message::Close(None)).await;
    let _ = state.events.send(HubEvent::ObserverLeft).await;
    info!("WebSocket client #{id} disconnected");
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.status.borrow().clone();
    Json(status)
}

async fn handle_set_touch(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Some(reading) = parse_touch_reading(value) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid touch reading (0-65535)");
    };

    state.touch_reading.store(reading, Ordering::Relaxed);
    debug!("simulated touch reading set to {reading}");
    StatusCode::NO_CONTENT.into_response()
}

async fn handle_get_touch(State(state): State<AppState>) -> impl IntoResponse {
    Json(TouchView {
        reading: state.touch_reading.load(Ordering::Relaxed),
        threshold: state.touch_threshold,
    })
}

impl SimulatedOutputs {
    fn new(relay_pins: [i32; DEVICE_COUNT]) -> Self {
        Self {
            relay_pins,
            relays: [false; DEVICE_COUNT],
            indicator: false,
        }
    }

    fn set_relay(&mut self, index: usize, on: bool) {
        let Some(state) = self.relays.get_mut(index) else {
            warn!("ignoring relay write for unknown index {index}");
            return;
        };
        *state = on;
        debug!(
            "GPIO{} <- {}",
            self.relay_pins[index],
            if on { "HIGH" } else { "LOW" }
        );
    }

    fn set_indicator(&mut self, on: bool) {
        if self.indicator != on {
            self.indicator = on;
            debug!("indicator {}", if on { "on" } else { "off" });
        }
    }
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("RELAYHUB_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.relayhub"));

        Self::in_dir(data_dir)
    }

    fn in_dir(data_dir: PathBuf) -> Self {
        Self {
            runtime_path: data_dir.join("runtime.json"),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(&self.runtime_path).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

fn parse_touch_reading(value: &str) -> Option<u16> {
    value.trim().parse::<u16>().ok()
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
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

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use relayhub_common::{HardwareConfig, HubConfig, OutboundMessage};

    use super::*;

    #[test]
    fn touch_reading_parsing() {
        assert_eq!(parse_touch_reading("12"), Some(12));
        assert_eq!(parse_touch_reading(" 40 "), Some(40));
        assert_eq!(parse_touch_reading("-1"), None);
        assert_eq!(parse_touch_reading("70000"), None);
    }

    #[test]
    fn executed_actions_reach_outputs_and_observers() {
        let mut hub = RelayHub::new(HubConfig::default(), 0);
        let mut outputs = SimulatedOutputs::new(HardwareConfig::default().relay_pins);
        let (observers, mut rx) = broadcast::channel(4);

        let actions = hub.apply_toggle(3, 10).expect("toggle accepted");
        execute_hub_actions(&hub, &mut outputs, &observers, actions);

        assert_eq!(outputs.relays, [false, false, false, true]);
        let expected = OutboundMessage::States {
            states: [false, false, false, true],
        }
        .to_json()
        .expect("serializes");
        assert_eq!(rx.try_recv().expect("broadcast sent"), expected);
    }

    #[test]
    fn sleep_actions_clear_simulated_outputs() {
        let config = HubConfig::default();
        let timeout_ms = config.sleep_timeout_ms;
        let mut hub = RelayHub::new(config, 0);
        let mut outputs = SimulatedOutputs::new(HardwareConfig::default().relay_pins);
        let (observers, _rx) = broadcast::channel(4);

        outputs.set_indicator(true);
        let actions = hub.apply_toggle(0, 0).expect("toggle accepted");
        execute_hub_actions(&hub, &mut outputs, &observers, actions);

        let actions = hub.tick(timeout_ms + 1, None);
        execute_hub_actions(&hub, &mut outputs, &observers, actions);

        assert_eq!(outputs.relays, [false; DEVICE_COUNT]);
        assert!(!outputs.indicator);
    }

    #[tokio::test]
    async fn stored_config_keeps_credentials_beside_overrides() {
        let data_dir = std::env::temp_dir().join(format!("relayhub-store-{}", std::process::id()));
        tokio::fs::create_dir_all(&data_dir).await.expect("temp dir");
        tokio::fs::write(
            data_dir.join("runtime.json"),
            r#"{"hub":{"sleep_timeout_ms":60000},"network":{"wifi_ssid":"home","wifi_pass":"secret"}}"#,
        )
        .await
        .expect("config written");

        let runtime = AppStore::in_dir(data_dir.clone())
            .load_runtime_config()
            .await
            .expect("config loads");
        let _ = tokio::fs::remove_dir_all(&data_dir).await;

        assert_eq!(runtime.hub.sleep_timeout_ms, 60_000);
        assert_eq!(runtime.network.wifi_ssid, "home");
        assert_eq!(runtime.network.wifi_pass, "secret");
    }

    #[tokio::test]
    async fn missing_config_file_loads_defaults() {
        let data_dir = std::env::temp_dir().join(format!("relayhub-empty-{}", std::process::id()));

        let runtime = AppStore::in_dir(data_dir)
            .load_runtime_config()
            .await
            .expect("missing file is not an error");

        assert_eq!(runtime.hub, HubConfig::default());
        assert_eq!(runtime.hardware, HardwareConfig::default());
    }
}
