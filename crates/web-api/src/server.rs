use crate::handlers::{self, AppState};
use crate::websocket;
use axum::{
    routing::{get, post},
    Router,
};
use coinpulse_core::EventBus;
use coinpulse_store::ScrapeStore;
use coinpulse_supervisor::SupervisorHandle;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Control-plane server: scraper lifecycle endpoints plus the `/ws` event
/// stream, same origin.
pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    #[must_use]
    pub fn new(supervisor: SupervisorHandle, bus: EventBus, store: Arc<ScrapeStore>) -> Self {
        Self {
            state: AppState {
                supervisor,
                bus,
                store,
            },
        }
    }

    /// Builds the router with all API routes.
    #[must_use]
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/", get(handlers::index))
            .route("/api/scraper/start", post(handlers::start_scraper))
            .route("/api/scraper/stop", post(handlers::stop_scraper))
            .route("/api/scraper/status", get(handlers::scraper_status))
            .route("/api/scraper/data", get(handlers::scraper_data))
            .route("/ws", get(websocket::websocket_handler))
            .with_state(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Starts the web server listening on the specified address.
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the address or serve
    /// requests.
    pub async fn serve(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("web API listening on {}", addr);

        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}
