//! MJPEG camera streaming and relay control over HTTP
//!
//! This library provides:
//! - A multipart MJPEG streaming loop with frame-interval smoothing
//! - JPEG encoding of raw frames, whole or chunk by chunk
//! - RAII frame leases so camera buffers are always returned
//! - Sensor controls and status over HTTP, relay and LED outputs on GPIO
//!
//! # Example
//!
//! ```no_run
//! use relaycam::camera::{SimulatedCamera, SimulatedCameraConfig};
//! use relaycam::filter::RunningAverage;
//! use relaycam::stream::StreamSession;
//!
//! let camera = SimulatedCamera::new(SimulatedCameraConfig::default()).unwrap();
//! let mut session = StreamSession::new(&camera, 80, RunningAverage::new(20));
//! let mut body = Vec::new();
//! session.stream_frame(&mut body).unwrap();
//! ```

pub mod camera;
pub mod config;
pub mod encoder;
pub mod filter;
pub mod gpio;
pub mod sink;
pub mod stream;
pub mod web;

// Re-exports for convenience
pub use camera::{open_camera, Camera, CameraError, FrameBuffer, FrameLease, PixelFormat};
pub use config::{Config, ConfigError};
pub use encoder::{EncodeError, JpegData};
pub use filter::RunningAverage;
pub use gpio::{GpioError, Relay, RelayBank};
pub use sink::{ChannelSink, ChunkSink, SinkError};
pub use stream::{SessionStats, StreamError, StreamSession};
pub use web::AppState;
