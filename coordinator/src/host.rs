use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::{net::TcpListener, sync::Mutex, time::MissedTickBehavior};
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use tentfan_common::{
    auth::deserialize_supplied,
    parse_supplied,
    protocol::{
        validate_speed, ActuatorStatus, AuthAccepted, AuthRequest, ErrorBody, SpeedAccepted,
    },
    AccessDigest, CommandError, CoordinatorConfig, CoordinatorStatus, FanCoordinator, FanProfile,
    HumiditySignal, LightSignal, ScheduleEntry, ScheduleTable, SignalCache, SignalSnapshot,
    SuppliedHash, TickAction, TOPIC_FAN_STATE, TOPIC_HUMIDIFIER_STATE, TOPIC_LIGHT_STATE,
};

use crate::{client::ActuatorClient, store::AppStore};

#[derive(Clone)]
struct AppState {
    coordinator: Arc<Mutex<FanCoordinator>>,
    signals: Arc<Mutex<SignalCache>>,
    airflow: Arc<Mutex<Map<String, Value>>>,
    actuator: ActuatorClient,
    // Held for the whole send-and-record of any speed or schedule command.
    dispatch: Arc<Mutex<()>>,
    mqtt: AsyncClient,
    store: AppStore,
}

#[derive(Debug, Serialize)]
struct StatusView {
    coordinator: CoordinatorStatus,
    signals: SignalSnapshot,
    fan: FanView,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum FanView {
    Online(ActuatorStatus),
    Offline { available: bool, error: String },
}

#[derive(Debug, Serialize)]
struct SettingsView {
    #[serde(flatten)]
    profile: FanProfile,
    airflow: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct SettingsUpdate {
    #[serde(default, deserialize_with = "deserialize_supplied")]
    auth_hash: SuppliedHash,
    day_speed: i64,
    night_speed: i64,
    #[serde(default)]
    boost_speed: Option<i64>,
    #[serde(default)]
    airflow: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct ManualSpeed {
    speed: i64,
    #[serde(default, deserialize_with = "deserialize_supplied")]
    auth_hash: SuppliedHash,
}

#[derive(Debug, Deserialize)]
struct ScheduleUpdate {
    schedules: Vec<ScheduleEntry>,
    #[serde(default, deserialize_with = "deserialize_supplied")]
    auth_hash: SuppliedHash,
}

#[derive(Debug, Serialize)]
struct ScheduleUpdateResponse {
    success: bool,
    ignored: usize,
}

const MAX_MQTT_PAYLOAD_BYTES: usize = 1024;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        Default::default()
    });
    apply_humidity_overrides(
        &mut runtime.coordinator,
        std::env::var("FAN_HUMIDITY_ON").ok(),
        std::env::var("FAN_HUMIDITY_OFF").ok(),
    );

    let actuator_url =
        std::env::var("ACTUATOR_URL").unwrap_or(runtime.network.actuator_url.clone());
    let actuator = ActuatorClient::new(
        &actuator_url,
        Duration::from_millis(runtime.coordinator.command_timeout_ms),
    )?;

    let mut coordinator = FanCoordinator::new(runtime.coordinator.clone(), runtime.profile);
    if let Ok(code) = std::env::var("FAN_AUTH_CODE") {
        if !code.is_empty() {
            coordinator.authenticate(AccessDigest::from_code(&code));
            info!("access code seeded from environment");
        }
    }

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("tentfan-coordinator", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let cycle = Duration::from_millis(runtime.coordinator.cycle_interval_ms);
    let publish_every = Duration::from_millis(runtime.coordinator.state_publish_interval_ms);

    let app_state = AppState {
        signals: Arc::new(Mutex::new(SignalCache::new(
            runtime.coordinator.signal_stale_timeout_ms,
        ))),
        coordinator: Arc::new(Mutex::new(coordinator)),
        airflow: Arc::new(Mutex::new(runtime.airflow)),
        actuator,
        dispatch: Arc::new(Mutex::new(())),
        mqtt,
        store,
    };

    subscribe_topics(&app_state.mqtt).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_control_loop(app_state.clone(), cycle);
    spawn_state_publish_loop(app_state.clone(), publish_every);

    let web_root = std::env::var("COORDINATOR_WEB_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(format!("{}/web", env!("CARGO_MANIFEST_DIR"))));
    let app = build_router(app_state, web_root);

    let port = std::env::var("COORDINATOR_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind coordinator server at {addr}"))?;

    info!("coordinator listening on http://{addr}, actuator at {actuator_url}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn build_router(app_state: AppState, web_root: PathBuf) -> Router {
    Router::new()
        .route("/api/status", get(handle_get_status))
        .route(
            "/api/settings",
            get(handle_get_settings).put(handle_put_settings),
        )
        .route("/api/auth", post(handle_post_auth))
        .route("/api/speed", post(handle_post_speed))
        .route(
            "/api/schedule",
            get(handle_get_schedule).put(handle_put_schedule),
        )
        .fallback_service(ServeDir::new(web_root))
        .with_state(app_state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested; no further control cycles will be scheduled");
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    for topic in [TOPIC_LIGHT_STATE, TOPIC_HUMIDIFIER_STATE] {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, &message.topic, &message.payload).await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_control_loop(app_state: AppState, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // A slow cycle pushes the next one back instead of bunching ticks up.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            run_control_cycle(&app_state).await;
        }
    });
}

fn spawn_state_publish_loop(app_state: AppState, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;

            let payload = {
                let coordinator = app_state.coordinator.lock().await;
                serde_json::to_vec(&coordinator.state_payload())
            };

            match payload {
                Ok(body) => {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(TOPIC_FAN_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("fan state publish failed: {err}");
                    }
                }
                Err(err) => warn!("fan state serialization failed: {err}"),
            }
        }
    });
}

/// One automatic decision cycle. Failures are logged and left for the next cycle.
async fn run_control_cycle(app_state: &AppState) {
    let _dispatch = app_state.dispatch.lock().await;

    let snapshot = {
        let signals = app_state.signals.lock().await;
        signals.snapshot(monotonic_ms())
    };

    let action = {
        let mut coordinator = app_state.coordinator.lock().await;
        let was_override = coordinator.is_override_active();
        let action = coordinator.tick(&snapshot);
        if coordinator.is_override_active() != was_override {
            info!(
                "humidity override {}",
                if was_override { "cleared" } else { "engaged" }
            );
        }
        action
    };

    match action {
        TickAction::Idle => {}
        TickAction::Suspended => {
            debug!("automatic fan transition skipped: no validated access code");
        }
        TickAction::Send(command) => {
            let outcome = app_state.actuator.set_speed(&command).await;
            match &outcome {
                Ok(speed) => info!(
                    "fan speed set to {speed}% ({})",
                    command.mode.map(|mode| mode.as_str()).unwrap_or("manual")
                ),
                Err(CommandError::AuthRejected { status }) => warn!(
                    "actuator rejected cached access code ({status}); automation suspended until re-authenticated"
                ),
                Err(err) if err.is_retryable() => {
                    warn!("automatic fan command failed, retrying next cycle: {err}")
                }
                Err(err) => warn!("automatic fan command refused by actuator: {err}"),
            }

            let mut coordinator = app_state.coordinator.lock().await;
            coordinator.record_automatic_outcome(&command, outcome);
        }
    }
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let now_ms = monotonic_ms();
    match topic {
        TOPIC_LIGHT_STATE => {
            let light: LightSignal =
                serde_json::from_slice(payload).context("invalid light payload")?;
            app_state.signals.lock().await.update_light(light, now_ms);
        }
        TOPIC_HUMIDIFIER_STATE => {
            let humidity: HumiditySignal =
                serde_json::from_slice(payload).context("invalid humidifier payload")?;
            app_state
                .signals
                .lock()
                .await
                .update_humidity(humidity, now_ms);
        }
        _ => {}
    }

    Ok(())
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let fan = match state.actuator.status().await {
        Ok(status) => FanView::Online(status),
        Err(err) => FanView::Offline {
            available: false,
            error: err.operator_message(),
        },
    };

    let signals = state.signals.lock().await.snapshot(monotonic_ms());
    let coordinator = state.coordinator.lock().await.status();

    Json(StatusView {
        coordinator,
        signals,
        fan,
    })
}

async fn handle_get_settings(State(state): State<AppState>) -> impl IntoResponse {
    let profile = *state.coordinator.lock().await.profile();
    let airflow = state.airflow.lock().await.clone();
    Json(SettingsView { profile, airflow })
}

async fn handle_put_settings(
    State(state): State<AppState>,
    body: Bytes,
) -> impl IntoResponse {
    let update: SettingsUpdate = match parse_body(&body) {
        Ok(update) => update,
        Err(response) => return response,
    };
    let digest = match digest_from(&update.auth_hash) {
        Ok(digest) => digest,
        Err(response) => return response,
    };

    let verified = state.actuator.verify(&digest).await;
    state
        .coordinator
        .lock()
        .await
        .record_manual_outcome(&digest, &verified);
    if let Err(err) = verified {
        return command_error_response(&err);
    }

    let current = *state.coordinator.lock().await.profile();
    let profile = match profile_from_update(&update, &current) {
        Ok(profile) => profile,
        Err(err) => return command_error_response(&err),
    };

    let mut changed = state.coordinator.lock().await.set_profile(profile);
    if let Some(airflow) = update.airflow {
        let mut current = state.airflow.lock().await;
        if *current != airflow {
            *current = airflow;
            changed = true;
        }
    }

    if changed {
        info!(
            "fan profile updated: day {}%, night {}%, boost {}%",
            profile.day_speed, profile.night_speed, profile.boost_speed
        );
        if let Err(err) = persist_runtime_from_state(&state).await {
            warn!("failed to persist settings update: {err:#}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to persist settings",
            );
        }
    }

    handle_get_settings(State(state)).await.into_response()
}

async fn handle_post_auth(
    State(state): State<AppState>,
    body: Bytes,
) -> impl IntoResponse {
    let request: AuthRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let digest = match digest_from(&request.auth_hash) {
        Ok(digest) => digest,
        Err(response) => return response,
    };

    let verified = state.actuator.verify(&digest).await;
    state
        .coordinator
        .lock()
        .await
        .record_manual_outcome(&digest, &verified);

    match verified {
        Ok(()) => {
            info!("access code verified; automatic transitions enabled");
            Json(AuthAccepted { success: true }).into_response()
        }
        Err(err) => command_error_response(&err),
    }
}

async fn handle_post_speed(
    State(state): State<AppState>,
    body: Bytes,
) -> impl IntoResponse {
    let request: ManualSpeed = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let digest = match digest_from(&request.auth_hash) {
        Ok(digest) => digest,
        Err(response) => return response,
    };

    let command = {
        let coordinator = state.coordinator.lock().await;
        coordinator.manual_speed_command(request.speed, digest.clone())
    };
    let command = match command {
        Ok(command) => command,
        Err(err) => return command_error_response(&err),
    };

    let _dispatch = state.dispatch.lock().await;
    let outcome = state.actuator.set_speed(&command).await;
    {
        let mut coordinator = state.coordinator.lock().await;
        coordinator.record_manual_outcome(&digest, &outcome);
        if let Ok(speed) = &outcome {
            coordinator.record_manual_speed(*speed);
        }
    }

    match outcome {
        Ok(speed) => {
            info!("manual fan speed set to {speed}%");
            Json(SpeedAccepted {
                success: true,
                speed,
            })
            .into_response()
        }
        Err(err) => {
            warn!("manual fan speed command failed: {err}");
            command_error_response(&err)
        }
    }
}

async fn handle_get_schedule(State(state): State<AppState>) -> impl IntoResponse {
    match state.actuator.schedule().await {
        Ok(listing) => Json(listing).into_response(),
        Err(err) => command_error_response(&err),
    }
}

async fn handle_put_schedule(
    State(state): State<AppState>,
    body: Bytes,
) -> impl IntoResponse {
    let update: ScheduleUpdate = match parse_body(&body) {
        Ok(update) => update,
        Err(response) => return response,
    };
    let digest = match digest_from(&update.auth_hash) {
        Ok(digest) => digest,
        Err(response) => return response,
    };

    // Reject bad rows here rather than spend a round trip on them.
    if let Err(err) = ScheduleTable::default().replace_all(&update.schedules) {
        return command_error_response(&err);
    }

    let _dispatch = state.dispatch.lock().await;
    let outcome = state.actuator.set_schedule(update.schedules, &digest).await;
    state
        .coordinator
        .lock()
        .await
        .record_manual_outcome(&digest, &outcome);

    match outcome {
        Ok(accepted) => {
            info!("fan schedule replaced ({} ignored)", accepted.ignored);
            Json(ScheduleUpdateResponse {
                success: accepted.success,
                ignored: accepted.ignored,
            })
            .into_response()
        }
        Err(err) => {
            warn!("fan schedule update failed: {err}");
            command_error_response(&err)
        }
    }
}

fn profile_from_update(
    update: &SettingsUpdate,
    current: &FanProfile,
) -> Result<FanProfile, CommandError> {
    Ok(FanProfile {
        day_speed: validate_speed(update.day_speed)?,
        night_speed: validate_speed(update.night_speed)?,
        boost_speed: match update.boost_speed {
            Some(speed) => validate_speed(speed)?,
            None => current.boost_speed,
        },
    })
}

/// `FAN_HUMIDITY_ON` / `FAN_HUMIDITY_OFF` replace the persisted override margins.
fn apply_humidity_overrides(
    config: &mut CoordinatorConfig,
    entry: Option<String>,
    exit: Option<String>,
) {
    if let Some(margin) = entry.and_then(|value| value.trim().parse::<f32>().ok()) {
        config.humidity_entry_margin = margin;
    }
    if let Some(margin) = exit.and_then(|value| value.trim().parse::<f32>().ok()) {
        config.humidity_exit_margin = margin;
    }
    config.sanitize();
}

async fn persist_runtime_from_state(state: &AppState) -> anyhow::Result<()> {
    let profile = *state.coordinator.lock().await.profile();
    let airflow = state.airflow.lock().await.clone();

    let mut runtime = state.store.load_runtime_config().await?;
    runtime.profile = profile;
    runtime.airflow = airflow;
    state.store.save_runtime_config(&runtime).await
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body)
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid JSON"))
}

fn digest_from(auth_hash: &SuppliedHash) -> Result<AccessDigest, Response> {
    parse_supplied(auth_hash).map_err(|failure| {
        let status =
            StatusCode::from_u16(failure.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
        error_response(status, failure.message())
    })
}

fn command_error_response(err: &CommandError) -> Response {
    let status = match err {
        CommandError::Validation(_) => StatusCode::BAD_REQUEST,
        CommandError::AuthRejected { .. } => StatusCode::FORBIDDEN,
        CommandError::Unavailable(_) | CommandError::Unreachable(_) => StatusCode::BAD_GATEWAY,
    };
    error_response(status, &err.operator_message())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorBody::new(message))).into_response()
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
