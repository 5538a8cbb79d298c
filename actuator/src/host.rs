use std::{
    net::SocketAddr,
    sync::Arc,
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
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::de::DeserializeOwned;
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{info, warn};

use tentfan_common::{
    authorize,
    protocol::{
        validate_pin, validate_speed, ActuatorStatus, AuthAccepted, AuthRequest, ErrorBody,
        PinAccepted, PinRequest, ScheduleAccepted, ScheduleListing, ScheduleRequest,
        SpeedAccepted, SpeedRequest, PATH_AUTH, PATH_SCHEDULE, PATH_SPEED, PATH_STATUS,
        PATH_TEMP_PIN,
    },
    AccessDigest, AuthFailure, CommandError, FanMode, ScheduleTable, SuppliedHash,
};

use crate::store::{DeviceStore, FanState};

const DEFAULT_AUTH_CODE: &str = "4444";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FanOutput {
    persisted: FanState,
    humidity_override: bool,
}

#[derive(Clone)]
struct ActuatorState {
    output: Arc<Mutex<FanOutput>>,
    schedule: Arc<Mutex<ScheduleTable>>,
    expected: Arc<AccessDigest>,
    timezone: Tz,
    store: DeviceStore,
    started: Instant,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = DeviceStore::new();
    let fan_state = store.load_fan_state().await.unwrap_or_else(|err| {
        warn!("failed to load fan state from store: {err:#}");
        FanState::default()
    });
    let schedule = store.load_schedule().await.unwrap_or_else(|err| {
        warn!("failed to load schedule from store: {err:#}");
        ScheduleTable::default()
    });

    let code = std::env::var("ACTUATOR_AUTH_CODE").unwrap_or(DEFAULT_AUTH_CODE.to_string());
    let timezone = std::env::var("ACTUATOR_TIMEZONE")
        .ok()
        .and_then(|name| {
            name.parse::<Tz>()
                .map_err(|_| warn!("unknown timezone {name}; using UTC"))
                .ok()
        })
        .unwrap_or(Tz::UTC);

    let state = ActuatorState {
        output: Arc::new(Mutex::new(FanOutput {
            persisted: fan_state,
            humidity_override: false,
        })),
        schedule: Arc::new(Mutex::new(schedule)),
        expected: Arc::new(AccessDigest::from_code(&code)),
        timezone,
        store,
        started: Instant::now(),
    };
    info!(
        "fan output restored at {}% (temperature pin {})",
        fan_state.speed, fan_state.temp_pin
    );

    spawn_schedule_loop(state.clone());

    let port = std::env::var("ACTUATOR_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8081);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind actuator server at {addr}"))?;

    info!("actuator listening on http://{addr} ({timezone})");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

fn router(state: ActuatorState) -> Router {
    Router::new()
        .route(PATH_STATUS, get(handle_get_status))
        .route(PATH_SPEED, post(handle_post_speed))
        .route(
            PATH_SCHEDULE,
            get(handle_get_schedule).post(handle_post_schedule),
        )
        .route(PATH_AUTH, post(handle_post_auth))
        .route(PATH_TEMP_PIN, post(handle_post_temp_pin))
        .with_state(state)
}

/// Ticks every second but evaluates the table at most once per local minute.
fn spawn_schedule_loop(state: ActuatorState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        let mut last_minute = None;

        loop {
            interval.tick().await;
            let now = Utc::now().with_timezone(&state.timezone);
            let minute_key = now.timestamp().div_euclid(60);
            if last_minute == Some(minute_key) {
                continue;
            }
            last_minute = Some(minute_key);

            if let Err(err) = run_schedule_minute(&state, &now).await {
                warn!("scheduled speed change failed: {err:#}");
            }
        }
    });
}

async fn run_schedule_minute<T: Timelike>(state: &ActuatorState, now: &T) -> anyhow::Result<()> {
    let due = state.schedule.lock().await.evaluate(now);
    if let Some(speed) = due {
        info!(
            "schedule fired at {:02}:{:02}: speed {speed}%",
            now.hour(),
            now.minute()
        );
        apply_speed(state, speed, None).await?;
    }
    Ok(())
}

async fn apply_speed(
    state: &ActuatorState,
    speed: u8,
    mode: Option<FanMode>,
) -> anyhow::Result<()> {
    let mut output = state.output.lock().await;
    output.humidity_override = mode == Some(FanMode::Control);
    if output.persisted.speed != speed {
        let mut next = output.persisted;
        next.speed = speed;
        state.store.save_fan_state(&next).await?;
        output.persisted = next;
    }
    Ok(())
}

async fn handle_get_status(State(state): State<ActuatorState>) -> impl IntoResponse {
    let output = *state.output.lock().await;
    let schedules = state.schedule.lock().await.summaries();
    let now: DateTime<Tz> = Utc::now().with_timezone(&state.timezone);

    Json(ActuatorStatus {
        available: true,
        speed: output.persisted.speed,
        enabled: output.persisted.speed > 0,
        // No radio on the host build.
        rssi: 0,
        time: now.format("%H:%M").to_string(),
        schedules,
        humidity_override: output.humidity_override,
        uptime: state.started.elapsed().as_secs(),
    })
}

async fn handle_post_speed(State(state): State<ActuatorState>, body: Bytes) -> impl IntoResponse {
    let request: SpeedRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if let Err(response) = check_auth(&state, &request.auth_hash) {
        return response;
    }

    let speed = match request
        .speed
        .ok_or_else(|| CommandError::Validation("Missing speed".to_string()))
        .and_then(validate_speed)
    {
        Ok(speed) => speed,
        Err(err) => return validation_response(&err),
    };

    if let Err(err) = apply_speed(&state, speed, request.mode).await {
        warn!("failed to persist fan speed: {err:#}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to persist speed");
    }

    info!(
        "fan speed set to {speed}% ({})",
        request.mode.map(|mode| mode.as_str()).unwrap_or("manual")
    );
    Json(SpeedAccepted {
        success: true,
        speed,
    })
    .into_response()
}

async fn handle_get_schedule(State(state): State<ActuatorState>) -> impl IntoResponse {
    let schedules = state.schedule.lock().await.entries().to_vec();
    Json(ScheduleListing { schedules })
}

async fn handle_post_schedule(
    State(state): State<ActuatorState>,
    body: Bytes,
) -> impl IntoResponse {
    let request: ScheduleRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if let Err(response) = check_auth(&state, &request.auth_hash) {
        return response;
    }
    let Some(incoming) = request.schedules else {
        return error_response(StatusCode::BAD_REQUEST, "Missing schedules");
    };

    let mut next = ScheduleTable::default();
    let ignored = match next.replace_all(&incoming) {
        Ok(ignored) => ignored,
        Err(err) => return validation_response(&err),
    };

    let mut active = state.schedule.lock().await;
    if let Err(err) = state.store.save_schedule(&next).await {
        warn!("failed to persist schedule: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist schedule",
        );
    }
    *active = next;

    info!("schedule table replaced ({ignored} out-of-range entries ignored)");
    Json(ScheduleAccepted {
        success: true,
        ignored,
    })
    .into_response()
}

async fn handle_post_auth(State(state): State<ActuatorState>, body: Bytes) -> impl IntoResponse {
    let request: AuthRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match check_auth(&state, &request.auth_hash) {
        Ok(()) => Json(AuthAccepted { success: true }).into_response(),
        Err(response) => response,
    }
}

async fn handle_post_temp_pin(
    State(state): State<ActuatorState>,
    body: Bytes,
) -> impl IntoResponse {
    let request: PinRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if let Err(response) = check_auth(&state, &request.auth_hash) {
        return response;
    }

    let pin = match request
        .pin
        .ok_or_else(|| CommandError::Validation("Missing pin".to_string()))
        .and_then(validate_pin)
    {
        Ok(pin) => pin,
        Err(err) => return validation_response(&err),
    };

    let mut output = state.output.lock().await;
    let mut next = output.persisted;
    next.temp_pin = pin;
    if let Err(err) = state.store.save_fan_state(&next).await {
        warn!("failed to persist temperature pin: {err:#}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to persist pin");
    }
    output.persisted = next;

    info!("temperature pin set to {pin}; takes effect after restart");
    Json(PinAccepted {
        success: true,
        pin,
        restart_required: true,
    })
    .into_response()
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body)
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid JSON"))
}

fn check_auth(state: &ActuatorState, supplied: &SuppliedHash) -> Result<(), Response> {
    authorize(&state.expected, supplied).map_err(|failure| {
        if failure == AuthFailure::Invalid {
            warn!("rejected request with wrong access code");
        }
        let status =
            StatusCode::from_u16(failure.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
        error_response(status, failure.message())
    })
}

fn validation_response(err: &CommandError) -> Response {
    error_response(StatusCode::BAD_REQUEST, &err.operator_message())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorBody::new(message))).into_response()
}
