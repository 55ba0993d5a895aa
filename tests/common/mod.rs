//! Shared fixtures for the HTTP integration tests

#![allow(dead_code)]

use axum::body::Body;
use axum::http::Request;
use parking_lot::Mutex;
use relaycam::camera::{
    Camera, CameraError, FrameBuffer, PixelFormat, Sensor, SensorState, SimulatedCamera,
    SimulatedCameraConfig,
};
use relaycam::config::Config;
use relaycam::gpio::{GpioError, Level, MemoryPins, OutputPins};
use relaycam::{AppState, RelayBank};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Pin driver whose levels stay visible to the test
#[derive(Clone, Default)]
pub struct SharedPins(pub Arc<Mutex<MemoryPins>>);

impl OutputPins for SharedPins {
    fn write(&mut self, pin: u8, level: Level) -> Result<(), GpioError> {
        self.0.lock().write(pin, level)
    }
}

impl SharedPins {
    pub fn level(&self, pin: u8) -> Option<Level> {
        self.0.lock().level(pin)
    }
}

pub struct Harness {
    pub camera: Arc<SimulatedCamera>,
    pub pins: SharedPins,
    pub relays: Arc<RelayBank>,
    pub state: AppState,
}

fn test_config(format: PixelFormat) -> Config {
    let mut config = Config::default();
    config.server.stream_port = 8081;
    config.camera.pixel_format = format;
    config.camera.frame_size = 0;
    config
}

pub fn harness(format: PixelFormat) -> Harness {
    let config = test_config(format);

    let camera = Arc::new(
        SimulatedCamera::new(SimulatedCameraConfig {
            pixel_format: format,
            frame_size: 0,
            fps: 0,
            ..Default::default()
        })
        .unwrap(),
    );

    let pins = SharedPins::default();
    let relays = Arc::new(RelayBank::new(Box::new(pins.clone()), &config.gpio).unwrap());
    let state = AppState::new(
        camera.clone(),
        relays.clone(),
        Arc::new(config),
        "camera.local",
    );

    Harness {
        camera,
        pins,
        relays,
        state,
    }
}

/// Camera whose raw frames carry fewer bytes than their size implies
pub struct TruncatedCamera {
    sensor: SensorState,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl TruncatedCamera {
    pub fn new() -> Self {
        Self {
            sensor: SensorState::new(PixelFormat::Rgb888, 0, 12),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}

impl Camera for TruncatedCamera {
    fn acquire(&self) -> Result<FrameBuffer, CameraError> {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(FrameBuffer {
            format: PixelFormat::Rgb888,
            width: 96,
            height: 96,
            data: vec![0x80; 100],
            timestamp: Instant::now(),
        })
    }

    fn release(&self, _frame: FrameBuffer) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    fn sensor(&self) -> &dyn Sensor {
        &self.sensor
    }
}

/// App state around an arbitrary camera with in-memory relays
pub fn state_for(camera: Arc<dyn Camera>) -> AppState {
    let config = test_config(PixelFormat::Rgb888);
    let relays = RelayBank::new(Box::new(SharedPins::default()), &config.gpio).unwrap();
    AppState::new(camera, Arc::new(relays), Arc::new(config), "camera.local")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Waits until every frame handed out by the camera has come back
pub async fn wait_for_release(camera: &SimulatedCamera) {
    for _ in 0..200 {
        if camera.in_use() == 0 && camera.acquired() == camera.released() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!(
        "frames not released: acquired {}, released {}",
        camera.acquired(),
        camera.released()
    );
}
