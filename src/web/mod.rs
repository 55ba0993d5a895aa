//! HTTP front end
//!
//! Two servers share one [`AppState`]: the control server (page, status,
//! sensor commands, capture, relays) and the stream server, which only
//! serves `/stream` so a long-lived stream never ties up the control port.

mod handlers;
pub mod page;

use axum::{body::Body, extract::State, routing::get, Router};
use futures_util::stream;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::camera::Camera;
use crate::config::Config;
use crate::gpio::{Relay, RelayBank};
use crate::sink::BodyChunk;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub camera: Arc<dyn Camera>,
    pub relays: Arc<RelayBank>,
    pub config: Arc<Config>,
    /// Host the control page points its stream `<img>` at, resolved once at startup
    pub public_host: Arc<str>,
}

impl AppState {
    pub fn new(
        camera: Arc<dyn Camera>,
        relays: Arc<RelayBank>,
        config: Arc<Config>,
        public_host: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            camera,
            relays,
            config,
            public_host: public_host.into(),
        }
    }
}

/// Routes served on the control port
pub fn control_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(handlers::index))
        .route("/status", get(handlers::status))
        .route("/cmd", get(handlers::cmd))
        .route("/capture", get(handlers::capture))
        .route("/ledon", get(handlers::led_on))
        .route("/ledoff", get(handlers::led_off));

    for relay in Relay::ALL {
        router = router.route(
            relay.path(),
            get(move |State(state): State<AppState>| handlers::relay(state, relay)),
        );
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Routes served on the stream port
pub fn stream_router(state: AppState) -> Router {
    Router::new()
        .route("/stream", get(handlers::stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Response body fed from a chunk channel
pub(crate) fn channel_body(rx: mpsc::Receiver<BodyChunk>) -> Body {
    Body::from_stream(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    }))
}

/// Runs both servers until one fails or Ctrl+C arrives
pub async fn serve(state: AppState, control: TcpListener, stream: TcpListener) -> anyhow::Result<()> {
    info!("Control server listening on http://{}", control.local_addr()?);
    info!("Stream server listening on http://{}/stream", stream.local_addr()?);

    let control_app = control_router(state.clone());
    let stream_app = stream_router(state);

    tokio::select! {
        result = axum::serve(control, control_app) => result?,
        result = axum::serve(stream, stream_app) => result?,
        _ = shutdown_signal() => info!("Shutdown requested"),
    }

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler; run until a server exits
        std::future::pending::<()>().await;
    }
}
