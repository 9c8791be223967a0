use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Query, Request, State, rejection::QueryRejection},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::portal::HealthPlanetClient;
use innerscan_core::SyncError;
use innerscan_core::db::Database;
use innerscan_core::models::Trend;
use innerscan_core::portal::PortalConfig;
use innerscan_core::service::{Synchronizer, window_start};

const DEFAULT_TREND_DAYS: u32 = 30;

#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Database>>,
    client: Arc<HealthPlanetClient>,
    config: Arc<PortalConfig>,
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct TrendQuery {
    num_days: Option<u32>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    records: i64,
    last_fetch: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Window { .. } => Self::BadRequest(err.to_string()),
            other => Self::Internal(other.into()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

// --- Middleware ---

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    response
}

// --- Handlers ---

async fn get_trend(
    State(state): State<AppState>,
    query: Result<Query<TrendQuery>, QueryRejection>,
) -> Result<Json<Trend>, ApiError> {
    let Query(params) = query?;
    let num_days = params.num_days.unwrap_or(DEFAULT_TREND_DAYS);
    if window_start(num_days, Utc::now()).is_none() {
        return Err(SyncError::Window { num_days }.into());
    }

    // The store handle is not Sync, so the refresh runs on a blocking thread
    // that holds the lock until the trend is built.
    let handle = Handle::current();
    let trend = tokio::task::spawn_blocking(move || {
        let db = state.db.lock().unwrap_or_else(PoisonError::into_inner);
        let sync = Synchronizer::new(&db, state.client.as_ref(), state.config.as_ref());
        handle.block_on(sync.trend(num_days, Utc::now()))
    })
    .await
    .context("trend task panicked")??;

    Ok(Json(trend))
}

async fn get_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let db = state.db.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(Json(HealthResponse {
        status: "ok",
        records: db.count_records().context("database error")?,
        last_fetch: db
            .get_last_fetch()
            .context("database error")?
            .map(|ts| ts.to_rfc3339()),
    }))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/trend", get(get_trend))
        .route("/api/health", get(get_health))
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    db: Database,
    client: HealthPlanetClient,
    config: PortalConfig,
    port: u16,
    bind: &str,
) -> anyhow::Result<()> {
    let state = AppState {
        db: Arc::new(Mutex::new(db)),
        client: Arc::new(client),
        config: Arc::new(config),
    };

    let app = build_router(state);

    if bind != "127.0.0.1" && bind != "localhost" {
        eprintln!(
            "Warning: Listening on {bind}. Any device on your network can read your measurements."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    info!("listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
