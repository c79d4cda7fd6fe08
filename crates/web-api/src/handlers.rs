use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use coinpulse_core::{EventBus, Post};
use coinpulse_store::ScrapeStore;
use coinpulse_supervisor::{SupervisorError, SupervisorHandle};
use serde::Serialize;
use std::sync::Arc;

/// Shared state behind every control-plane route.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: SupervisorHandle,
    pub bus: EventBus,
    pub store: Arc<ScrapeStore>,
}

#[derive(Serialize)]
pub struct StartResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Serialize)]
pub struct StopResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize)]
pub struct DataResponse {
    pub success: bool,
    pub count: usize,
    pub data: Vec<Post>,
}

/// Service banner.
pub async fn index() -> &'static str {
    "CoinPulse crypto sentiment pipeline"
}

/// Launches the scraper stage. The scrape store is reset before launch.
///
/// # Errors
/// `409` while a stage is already running, `500` on spawn failure.
pub async fn start_scraper(
    State(state): State<AppState>,
) -> Result<Json<StartResponse>, (StatusCode, Json<StartResponse>)> {
    match state.supervisor.start_scraper().await {
        Ok(pid) => Ok(Json(StartResponse {
            success: true,
            pid: Some(pid),
            message: None,
        })),
        Err(e @ (SupervisorError::AlreadyRunning | SupervisorError::Busy)) => Err((
            StatusCode::CONFLICT,
            Json(StartResponse {
                success: false,
                pid: None,
                message: Some(e.to_string()),
            }),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(StartResponse {
                success: false,
                pid: None,
                message: Some(e.to_string()),
            }),
        )),
    }
}

/// Stops a running scraper stage; processing then runs over the posts
/// already persisted.
///
/// # Errors
/// `409` when the pipeline is idle.
pub async fn stop_scraper(
    State(state): State<AppState>,
) -> Result<Json<StopResponse>, (StatusCode, Json<StopResponse>)> {
    match state.supervisor.stop_scraper().await {
        Ok(()) => Ok(Json(StopResponse {
            success: true,
            message: "scraper stopping".to_string(),
        })),
        Err(e @ SupervisorError::NotRunning) => Err((
            StatusCode::CONFLICT,
            Json(StopResponse {
                success: false,
                message: e.to_string(),
            }),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(StopResponse {
                success: false,
                message: e.to_string(),
            }),
        )),
    }
}

/// Current scraper status.
///
/// # Errors
/// `500` only when the supervisor is gone.
pub async fn scraper_status(
    State(state): State<AppState>,
) -> Result<Json<coinpulse_supervisor::ScraperStatus>, StatusCode> {
    state
        .supervisor
        .status()
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Full scrape store contents. `200` with an empty array when nothing has
/// been scraped.
///
/// # Errors
/// `500` when the store stays unreadable through its retries.
pub async fn scraper_data(
    State(state): State<AppState>,
) -> Result<Json<DataResponse>, StatusCode> {
    match state.store.load().await {
        Ok(data) => Ok(Json(DataResponse {
            success: true,
            count: data.len(),
            data,
        })),
        Err(e) => {
            tracing::error!("scrape store read failed: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
