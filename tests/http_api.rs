//! Control server endpoints driven in-process

mod common;

use axum::body::to_bytes;
use axum::http::{header, StatusCode};
use common::{get, harness, state_for, wait_for_release, TruncatedCamera};
use relaycam::camera::sensor::STATUS_KEYS;
use relaycam::camera::PixelFormat;
use relaycam::gpio::{Level, Relay};
use relaycam::web::control_router;
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

#[rstest]
#[case("/cmd?var=quality&val=10", StatusCode::OK)]
#[case("/cmd?var=brightness&val=-2", StatusCode::OK)]
#[case("/cmd?var=colorbar&val=1", StatusCode::OK)]
#[case("/cmd?var=framesize&val=5", StatusCode::OK)]
#[case("/cmd?var=bogus&val=1", StatusCode::INTERNAL_SERVER_ERROR)]
#[case("/cmd?var=quality&val=99", StatusCode::INTERNAL_SERVER_ERROR)]
#[case("/cmd", StatusCode::NOT_FOUND)]
#[case("/cmd?var=quality", StatusCode::NOT_FOUND)]
#[case("/cmd?val=10", StatusCode::NOT_FOUND)]
#[case("/cmd?var=quality&val=ten", StatusCode::NOT_FOUND)]
#[tokio::test]
async fn test_cmd_status_codes(#[case] uri: &str, #[case] expected: StatusCode) {
    let h = harness(PixelFormat::Jpeg);
    let response = control_router(h.state).oneshot(get(uri)).await.unwrap();
    assert_eq!(response.status(), expected, "{}", uri);

    if expected == StatusCode::OK {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }
}

#[tokio::test]
async fn test_cmd_updates_status() {
    let h = harness(PixelFormat::Jpeg);

    let response = control_router(h.state.clone())
        .oneshot(get("/cmd?var=quality&val=10"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = control_router(h.state).oneshot(get("/status")).await.unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status["quality"], 10);
}

#[tokio::test]
async fn test_framesize_ignored_for_raw_sensor() {
    let h = harness(PixelFormat::Rgb565);

    let response = control_router(h.state.clone())
        .oneshot(get("/cmd?var=framesize&val=5"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = control_router(h.state).oneshot(get("/status")).await.unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status["framesize"], 0);
}

#[tokio::test]
async fn test_status_keys_in_order() {
    let h = harness(PixelFormat::Jpeg);
    let response = control_router(h.state).oneshot(get("/status")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/json"
    );
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = std::str::from_utf8(&body).unwrap();

    let status: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(status.as_object().unwrap().len(), 23);

    let mut last = 0;
    for key in STATUS_KEYS {
        let needle = format!("\"{}\":", key);
        assert_eq!(text.matches(&needle).count(), 1, "{}", key);
        let pos = text.find(&needle).unwrap();
        assert!(pos >= last, "{} out of order", key);
        last = pos;
    }
}

#[rstest]
#[case(Relay::R1)]
#[case(Relay::R3)]
#[case(Relay::R5)]
#[case(Relay::R7)]
#[tokio::test]
async fn test_relay_toggles_in_pairs(#[case] relay: Relay) {
    let h = harness(PixelFormat::Jpeg);
    let pin = h.relays.pin(relay);
    assert_eq!(h.pins.level(pin), Some(Level::Low));

    let response = control_router(h.state.clone())
        .oneshot(get(relay.path()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"OK");
    assert!(h.relays.is_on(relay));
    assert_eq!(h.pins.level(pin), Some(Level::High));

    let response = control_router(h.state.clone())
        .oneshot(get(relay.path()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!h.relays.is_on(relay));
    assert_eq!(h.pins.level(pin), Some(Level::Low));
}

#[tokio::test]
async fn test_led_on_off() {
    let h = harness(PixelFormat::Jpeg);
    let led = h.relays.led_pin();

    let response = control_router(h.state.clone()).oneshot(get("/ledon")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"OK");
    assert_eq!(h.pins.level(led), Some(Level::High));

    let response = control_router(h.state.clone()).oneshot(get("/ledoff")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.pins.level(led), Some(Level::Low));
}

#[tokio::test]
async fn test_index_page() {
    let h = harness(PixelFormat::Jpeg);
    assert!(h.state.config.server.public_host.is_none());
    let response = control_router(h.state).oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert!(headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    assert_eq!(headers["access-control-allow-private-network"], "true");

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let html = std::str::from_utf8(&body).unwrap();
    assert!(html.contains("http://camera.local:8081/stream"));
}

#[rstest]
#[case(PixelFormat::Jpeg)]
#[case(PixelFormat::Rgb565)]
#[case(PixelFormat::Grayscale)]
#[case(PixelFormat::Yuv422)]
#[tokio::test]
async fn test_capture_returns_jpeg(#[case] format: PixelFormat) {
    let h = harness(format);
    let response = control_router(h.state).oneshot(get("/capture")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "inline; filename=capture.jpg"
    );

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..2], &[0xFF, 0xD8]);
    assert_eq!(&body[body.len() - 2..], &[0xFF, 0xD9]);

    wait_for_release(&h.camera).await;
    assert_eq!(h.camera.acquired(), 1);
}

#[tokio::test]
async fn test_capture_camera_failure() {
    let h = harness(PixelFormat::Jpeg);
    h.camera.inject_faults(1);

    let response = control_router(h.state).oneshot(get("/capture")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(h.camera.in_use(), 0);
}

#[tokio::test]
async fn test_capture_encode_failure_aborts_body() {
    let camera = Arc::new(TruncatedCamera::new());
    let state = state_for(camera.clone());

    let response = control_router(state).oneshot(get("/capture")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());

    for _ in 0..200 {
        if camera.released() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(camera.acquired(), 1);
    assert_eq!(camera.released(), 1);
}

#[tokio::test]
async fn test_unknown_route() {
    let h = harness(PixelFormat::Jpeg);
    let response = control_router(h.state).oneshot(get("/stream")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
