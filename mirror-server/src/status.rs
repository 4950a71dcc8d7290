//! Connectivity reporting
use crate::routes::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures::{stream, StreamExt};
use mirror_runtime::Status;
use std::convert::Infallible;
use tokio_stream::wrappers::WatchStream;

/// `GET /health`: the session's connectivity status as a stream of plain tokens
///
/// In-cluster sessions are never probed; they send a single `close` event instead.
pub async fn stream(State(state): State<AppState>) -> Response {
    if state.session.in_cluster() {
        let close = Event::default().event("close").data(Status::InCluster.as_str());
        return Sse::new(stream::once(async move { Ok::<_, Infallible>(close) })).into_response();
    }
    let statuses = WatchStream::new(state.session.status())
        .map(|status| Ok::<_, Infallible>(Event::default().data(status.as_str())))
        .take_until(state.shutdown.cancelled_owned());
    Sse::new(statuses).keep_alive(KeepAlive::default()).into_response()
}

/// `GET /healthz`: 200 while the session is connected, 503 otherwise
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    if state.session.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}
