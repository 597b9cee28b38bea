//! HTTP server initialization and routing

mod health;
mod shutdown;

pub use health::*;
pub use shutdown::*;

use axum::routing::get;
use axum::Router;
use log::{error, info};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::shared::state::AppState;

/// All calendar API routes plus the health probes.
pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check_simple))
        .merge(crate::permission::configure_permission_routes())
        .merge(crate::recurrence::configure_recurrence_routes())
        .merge(crate::invitation::configure_invitation_routes())
}

pub async fn run_server(app_state: Arc<AppState>, host: &str, port: u16) -> std::io::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(configure_api_routes().with_state(app_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", host, port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(
                "Failed to bind to {}: {} - is another instance running?",
                addr, e
            );
            return Err(e);
        }
    };
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(std::io::Error::other)
}
