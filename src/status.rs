use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::clock::Clock;
use crate::session::{Phase, SessionSnapshot};

#[derive(Clone)]
struct StatusState {
    session: watch::Receiver<SessionSnapshot>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    streaming: bool,
    state: Phase,
    source_url: Option<String>,
    resolved_url: Option<String>,
    resolved_expiry: u64,
    now: u64,
}

pub fn router(session: watch::Receiver<SessionSnapshot>, clock: Arc<dyn Clock>) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/status", get(session_status))
        .with_state(StatusState { session, clock })
}

async fn liveness() -> &'static str {
    "✅ Live relay bot is running."
}

async fn session_status(State(state): State<StatusState>) -> Json<StatusBody> {
    let snapshot = state.session.borrow().clone();
    Json(StatusBody {
        streaming: snapshot.streaming,
        state: snapshot.phase,
        source_url: snapshot.source_url,
        resolved_url: snapshot.resolved_url,
        resolved_expiry: snapshot.resolved_expiry,
        now: state.clock.now(),
    })
}

pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
