use crate::api;
use crate::error::{ErrorKind, Result};
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use exn::ResultExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

/// All routes with their middleware.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/system/summary", get(api::summary))
        .route("/api/system/summary/scan", post(api::scan))
        .route("/api/system/summary/stream", get(api::stream))
        .route("/api/system/summary/export", get(api::export))
        .route("/api/system/summary/cache/stats", get(api::cache_stats))
        .route("/api/system/summary/cache/invalidate", post(api::invalidate_cache))
        .route("/api/system/summary/cache/clear", post(api::clear_cache))
        .route("/api/system/summary/health", get(api::health))
        .route("/api/system/summary/history", get(api::history))
        .route("/api/system/summary/compare", get(api::compare))
        // Panicking handlers become 500s; the trace layer sits outside so it logs them.
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the state's shutdown token is cancelled.
pub async fn serve(state: Arc<AppState>, bind: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await.or_raise(|| ErrorKind::Bind(bind))?;
    tracing::info!(%bind, "Listening");
    let shutdown = state.shutdown().clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .or_raise(|| ErrorKind::Serve)
}
