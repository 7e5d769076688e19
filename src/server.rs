//! HTTP API server: axum router and request handlers.
//!
//! This is the settings layer's surface. Handlers write settings to the
//! [`ConfigStore`] and then ask the matrix worker to re-apply; they never
//! touch the device. Communication with the worker thread is a
//! `std::sync::mpsc` channel of [`ControlCommand`]s, and the worker
//! publishes a [`ControllerStatus`] snapshot the handlers read back.

use crate::config::{ConfigStore, Settings};
use crate::controller::{ControlCommand, ControllerStatus};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

// ── App State ────────────────────────────────────────────────────────

/// Shared application state, passed to every handler via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Channel to the matrix worker
    pub command_tx: Sender<ControlCommand>,
    /// Controller status (worker writes, handlers read)
    pub status: Arc<Mutex<ControllerStatus>>,
    /// Persisted device settings
    pub config: Arc<dyn ConfigStore>,
    /// Pictures must live under this directory
    pub media_dir: PathBuf,
}

// ── OpenAPI Documentation ────────────────────────────────────────────

#[derive(OpenApi)]
#[openapi(
    paths(
        get_status,
        get_settings,
        put_settings,
        post_apply,
        post_mode_picture,
        post_mode_clock,
        post_power_lid,
        post_power_battery,
    ),
    components(schemas(
        ControllerStatus,
        Settings,
        ApplyRequest,
        PictureRequest,
        LidRequest,
    )),
    tags(
        (name = "mode", description = "Display mode endpoints"),
        (name = "power", description = "Power and lid events"),
        (name = "system", description = "Status and settings"),
    ),
    info(
        title = "LED Matrix API",
        version = env!("CARGO_PKG_VERSION"),
        description = "HTTP API for the LED matrix engine: settings, modes and power events"
    )
)]
pub struct ApiDoc;

// ── Request types ────────────────────────────────────────────────────

#[derive(Deserialize, utoipa::ToSchema)]
pub struct ApplyRequest {
    /// Send the device wake pulse if this activation turns the display on
    #[serde(default)]
    #[schema(example = false, default = false)]
    wake: bool,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct PictureRequest {
    /// Path to a picture relative to the media directory (PNG, JPEG, BMP or animated GIF)
    #[schema(example = "pictures/cat.gif")]
    path: String,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct LidRequest {
    /// Whether the lid is now closed
    closed: bool,
    /// Re-apply even if lid awareness is disabled
    #[serde(default)]
    #[schema(default = false)]
    force: bool,
}

// ── Router ───────────────────────────────────────────────────────────

/// Build the axum router with all API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(
            SwaggerUi::new("/docs")
                .url("/api-docs/openapi.json", ApiDoc::openapi())
                .config(utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"]).validator_url("none")),
        )
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/settings", get(get_settings).put(put_settings))
        .route("/api/v1/apply", post(post_apply))
        .route("/api/v1/mode/picture", post(post_mode_picture))
        .route("/api/v1/mode/clock", post(post_mode_clock))
        .route("/api/v1/power/lid", post(post_power_lid))
        .route("/api/v1/power/battery", post(post_power_battery))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type ApiError = (StatusCode, String);

fn send(state: &AppState, cmd: ControlCommand) -> Result<(), ApiError> {
    state.command_tx.send(cmd).map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Matrix worker gone".to_string(),
        )
    })
}

// ── Handlers ─────────────────────────────────────────────────────────

/// GET /api/v1/status — return current controller state
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "system",
    responses(
        (status = 200, description = "Current controller status", body = ControllerStatus)
    )
)]
async fn get_status(State(state): State<AppState>) -> Json<ControllerStatus> {
    let status = state
        .status
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    Json(status)
}

/// GET /api/v1/settings — current persisted settings
#[utoipa::path(
    get,
    path = "/api/v1/settings",
    tag = "system",
    responses(
        (status = 200, description = "Persisted settings", body = Settings)
    )
)]
async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(Settings::load(state.config.as_ref()))
}

/// PUT /api/v1/settings — replace settings and re-apply
#[utoipa::path(
    put,
    path = "/api/v1/settings",
    tag = "system",
    request_body = Settings,
    responses(
        (status = 200, description = "Settings stored and applied", body = Settings)
    )
)]
async fn put_settings(
    State(state): State<AppState>,
    Json(settings): Json<Settings>,
) -> Result<Json<Settings>, ApiError> {
    settings.store(state.config.as_ref());
    send(&state, ControlCommand::Apply { wake: false })?;
    Ok(Json(Settings::load(state.config.as_ref())))
}

/// POST /api/v1/apply — re-apply the current configuration
#[utoipa::path(
    post,
    path = "/api/v1/apply",
    tag = "mode",
    request_body = ApplyRequest,
    responses(
        (status = 200, description = "Apply queued"),
    )
)]
async fn post_apply(
    State(state): State<AppState>,
    Json(req): Json<ApplyRequest>,
) -> Result<StatusCode, ApiError> {
    send(&state, ControlCommand::Apply { wake: req.wake })?;
    Ok(StatusCode::OK)
}

/// POST /api/v1/mode/picture — show a picture and make it the configured mode
#[utoipa::path(
    post,
    path = "/api/v1/mode/picture",
    tag = "mode",
    request_body = PictureRequest,
    responses(
        (status = 200, description = "Picture queued"),
        (status = 404, description = "Picture not found"),
        (status = 400, description = "Invalid path")
    )
)]
async fn post_mode_picture(
    State(state): State<AppState>,
    Json(req): Json<PictureRequest>,
) -> Result<StatusCode, ApiError> {
    let full_path = validate_media_path(&state.media_dir, &req.path)?;
    send(&state, ControlCommand::ShowPicture(full_path))?;
    Ok(StatusCode::OK)
}

/// POST /api/v1/mode/clock — switch to the clock
#[utoipa::path(
    post,
    path = "/api/v1/mode/clock",
    tag = "mode",
    responses(
        (status = 200, description = "Clock queued"),
    )
)]
async fn post_mode_clock(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    send(&state, ControlCommand::ShowClock)?;
    Ok(StatusCode::OK)
}

/// POST /api/v1/power/lid — lid opened or closed
#[utoipa::path(
    post,
    path = "/api/v1/power/lid",
    tag = "power",
    request_body = LidRequest,
    responses(
        (status = 200, description = "Lid event queued"),
    )
)]
async fn post_power_lid(
    State(state): State<AppState>,
    Json(req): Json<LidRequest>,
) -> Result<StatusCode, ApiError> {
    send(&state, ControlCommand::SetLidClosed(req.closed))?;
    send(&state, ControlCommand::LidPolicy { force: req.force })?;
    Ok(StatusCode::OK)
}

/// POST /api/v1/power/battery — AC plugged or unplugged
#[utoipa::path(
    post,
    path = "/api/v1/power/battery",
    tag = "power",
    responses(
        (status = 200, description = "Battery event queued"),
    )
)]
async fn post_power_battery(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    send(&state, ControlCommand::BatteryPolicy)?;
    Ok(StatusCode::OK)
}

// ── Path validation ──────────────────────────────────────────────────

/// Validate that a requested path is within the media directory.
///
/// Both paths are canonicalized so `..` components can't escape.
fn validate_media_path(media_dir: &Path, relative_path: &str) -> Result<PathBuf, ApiError> {
    let full_path = media_dir.join(relative_path);

    let canonical = full_path.canonicalize().map_err(|_| {
        (
            StatusCode::NOT_FOUND,
            format!("Path not found: {relative_path}"),
        )
    })?;

    let canonical_media = media_dir.canonicalize().map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Media directory not found".to_string(),
        )
    })?;

    if !canonical.starts_with(&canonical_media) {
        return Err((
            StatusCode::BAD_REQUEST,
            "Path is outside the media directory".to_string(),
        ));
    }

    Ok(canonical)
}
