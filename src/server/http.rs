//! HTTP query surface exposing count snapshots and pipeline health.

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    PipelineError,
    pipeline::{aggregate::AggregatorStatus, counts::SnapshotReader},
};

#[derive(Clone)]
struct AppState {
    reader: SnapshotReader,
    status: watch::Receiver<AggregatorStatus>,
}

/// Spawns the HTTP server on an already-bound listener.
pub fn spawn(
    listener: TcpListener,
    reader: SnapshotReader,
    status: watch::Receiver<AggregatorStatus>,
    shutdown: CancellationToken,
) -> JoinHandle<Result<(), PipelineError>> {
    tokio::spawn(serve(listener, reader, status, shutdown))
}

async fn serve(
    listener: TcpListener,
    reader: SnapshotReader,
    status: watch::Receiver<AggregatorStatus>,
    shutdown: CancellationToken,
) -> Result<(), PipelineError> {
    let state = AppState { reader, status };
    let app = Router::new()
        .route("/metrics", get(handle_metrics))
        .route("/healthz", get(handle_health))
        .with_state(state);

    info!(target: "http", "query surface ready");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|err| PipelineError::Io(format!("http serve: {err}")))
}

// GET /metrics: one snapshot per request, rows in unspecified order.
async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.reader.snapshot()).into_response()
}

// GET /healthz: 503 once the aggregator no longer tracks incoming records,
// at which point /metrics serves a silently stale table.
async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.status.borrow().clone();
    let code = if status.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, status.to_string()).into_response()
}
