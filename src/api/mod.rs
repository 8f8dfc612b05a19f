//! REST interface under `/api/v3`.

pub mod error;
pub mod forward;
mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::service::ExecutionService;

pub use forward::{PeerForwarder, FORWARDED_FROM_HEADER};

pub const API_PREFIX: &str = "/api/v3";

#[derive(Clone)]
pub struct ApiState {
    pub service: ExecutionService,
    pub forwarder: Arc<PeerForwarder>,
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route(
            "/jobs",
            get(handlers::list_jobs_handler).post(handlers::submit_job_handler),
        )
        .route(
            "/jobs/:id",
            get(handlers::get_job_handler).delete(handlers::kill_job_handler),
        )
        .route("/jobs/:id/status", get(handlers::job_status_handler))
        .route("/clusters", get(handlers::list_clusters_handler));

    Router::new()
        .nest(API_PREFIX, api)
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `shutdown` is cancelled.
pub async fn run_api(addr: SocketAddr, state: ApiState, shutdown: CancellationToken) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting API server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind API server");
            shutdown.cancel();
            return;
        }
    };

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await;

    if let Err(e) = result {
        tracing::error!(error = %e, "API server failed");
    }
}
