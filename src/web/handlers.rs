//! HTTP handlers for the control and stream servers

use axum::{
    body::Body,
    extract::{rejection::QueryRejection, Query, State},
    http::{header, HeaderName, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::{channel_body, page, AppState};
use crate::camera::{CameraError, Control, FrameLease};
use crate::encoder;
use crate::filter::RunningAverage;
use crate::gpio::Relay;
use crate::sink::ChannelSink;
use crate::stream::{StreamSession, STREAM_CONTENT_TYPE, STREAM_FRAMERATE_HINT};

const ALLOW_PRIVATE_NETWORK: HeaderName =
    HeaderName::from_static("access-control-allow-private-network");
const X_FRAMERATE: HeaderName = HeaderName::from_static("x-framerate");

/// Control page
pub async fn index(State(state): State<AppState>) -> Response {
    let html = page::render(&state.public_host, state.config.server.stream_port);
    (
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true"),
            (ALLOW_PRIVATE_NETWORK, "true"),
        ],
        Html(html),
    )
        .into_response()
}

/// Current sensor registers as JSON
pub async fn status(State(state): State<AppState>) -> Response {
    let status = state.camera.sensor().status();
    (
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(status),
    )
        .into_response()
}

/// Applies `var=<name>&val=<int>` to the sensor
pub async fn cmd(
    State(state): State<AppState>,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
) -> Response {
    let Ok(Query(params)) = query else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let (Some(var), Some(val)) = (params.get("var"), params.get("val")) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Ok(value) = val.parse::<i32>() else {
        debug!(var = %var, val = %val, "Non-numeric control value");
        return StatusCode::NOT_FOUND.into_response();
    };

    let result = var
        .parse::<Control>()
        .and_then(|control| state.camera.sensor().apply(control, value));

    match result {
        Ok(()) => {
            info!(var = %var, val = %value, "Sensor control applied");
            (
                [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
                StatusCode::OK,
            )
                .into_response()
        }
        Err(e) => {
            warn!(var = %var, val = %value, error = %e, "Sensor control rejected");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Single JPEG snapshot
///
/// JPEG frames are returned whole. Raw frames are compressed straight into
/// the response body; an encoder failure after the headers went out aborts
/// the connection.
pub async fn capture(State(state): State<AppState>) -> Response {
    let camera = state.camera.clone();
    let quality = state.config.stream.encode_quality;
    let (mut sink, rx) = ChannelSink::channel(state.config.stream.channel_depth);
    let (ready_tx, ready_rx) = oneshot::channel::<Result<Option<Bytes>, CameraError>>();

    tokio::task::spawn_blocking(move || {
        let start = Instant::now();
        let lease = match FrameLease::acquire(camera.as_ref()) {
            Ok(lease) => lease,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };

        if lease.format().is_jpeg() {
            let jpeg = Bytes::copy_from_slice(lease.data());
            drop(lease);
            info!(bytes = %jpeg.len(), elapsed_ms = %start.elapsed().as_millis(), "JPG capture");
            let _ = ready_tx.send(Ok(Some(jpeg)));
            return;
        }

        if ready_tx.send(Ok(None)).is_err() {
            return;
        }

        let result = encoder::encode_chunked(lease.frame(), quality, &mut sink);
        drop(lease);
        match result {
            Ok(bytes) => {
                info!(bytes = %bytes, elapsed_ms = %start.elapsed().as_millis(), "JPG capture");
            }
            Err(e) => {
                error!(error = %e, "JPEG compression failed");
                sink.abort(e);
            }
        }
    });

    let body = match ready_rx.await {
        Ok(Ok(Some(jpeg))) => Body::from(jpeg),
        Ok(Ok(None)) => channel_body(rx),
        Ok(Err(e)) => {
            error!(error = %e, "Camera capture failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(_) => {
            error!("Capture worker exited early");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    (
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CONTENT_DISPOSITION, "inline; filename=capture.jpg"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        body,
    )
        .into_response()
}

/// Flips one relay
pub async fn relay(state: AppState, relay: Relay) -> Response {
    match state.relays.toggle(relay) {
        Ok(_) => ok_html(),
        Err(e) => {
            error!(relay = %relay, error = %e, "Relay toggle failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn led_on(State(state): State<AppState>) -> Response {
    set_led(&state, true)
}

pub async fn led_off(State(state): State<AppState>) -> Response {
    set_led(&state, false)
}

fn set_led(state: &AppState, on: bool) -> Response {
    match state.relays.set_led(on) {
        Ok(()) => ok_html(),
        Err(e) => {
            error!(on = %on, error = %e, "LED write failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn ok_html() -> Response {
    Html("OK").into_response()
}

/// Continuous MJPEG stream
///
/// The session runs on a blocking worker and ends when the client drops the
/// body or the camera or encoder fail.
pub async fn stream(State(state): State<AppState>) -> Response {
    let camera = state.camera.clone();
    let quality = state.config.stream.encode_quality;
    let window = state.config.stream.average_window;
    let (mut sink, rx) = ChannelSink::channel(state.config.stream.channel_depth);

    tokio::task::spawn_blocking(move || {
        info!("Stream session started");
        let mut session = StreamSession::new(camera.as_ref(), quality, RunningAverage::new(window));
        let err = session.run(&mut sink);
        let stats = session.stats();

        if err.is_disconnect() {
            info!(
                frames = %stats.frames_sent,
                bytes = %stats.bytes_sent,
                avg_frame_bytes = %stats.avg_frame_bytes(),
                "Stream client disconnected"
            );
        } else {
            warn!(
                frames = %stats.frames_sent,
                bytes = %stats.bytes_sent,
                error = %err,
                "Stream session failed"
            );
            sink.abort(err);
        }
    });

    (
        [
            (header::CONTENT_TYPE, STREAM_CONTENT_TYPE),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (X_FRAMERATE, STREAM_FRAMERATE_HINT),
        ],
        channel_body(rx),
    )
        .into_response()
}
