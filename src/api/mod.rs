pub mod handlers;
pub mod types;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::pipeline::AmlPipeline;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AmlPipeline>,
}

pub fn router(pipeline: Arc<AmlPipeline>) -> Router {
    let state = Arc::new(AppState { pipeline });

    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/stats", get(handlers::stats))
        .route("/api/rules", get(handlers::rules))
        .route("/api/run-rules", post(handlers::run_rules))
        .route("/api/transactions", get(handlers::list_transactions))
        .route("/api/customers", get(handlers::list_customers))
        .route("/api/flagged", get(handlers::list_flagged))
        .route(
            "/api/flagged/{flag_id}/review",
            post(handlers::submit_review),
        )
        .route(
            "/api/transaction/{transaction_id}/explanation",
            get(handlers::transaction_explanation),
        )
        .route("/api/llm/analyze", post(handlers::analyze))
        .route("/api/llm/audit", get(handlers::llm_audit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn serve(
    pipeline: Arc<AmlPipeline>,
    host: &str,
    port: u16,
    shutdown: CancellationToken,
) -> eyre::Result<()> {
    let app = router(pipeline);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    tracing::info!("API server stopped");
    Ok(())
}
