//! Camera collaborator: frame buffers, acquisition and release

#[cfg(feature = "gstreamer")]
mod gst;
pub mod sensor;
mod simulated;

#[cfg(feature = "gstreamer")]
pub use gst::GstCamera;
pub use sensor::{Control, Sensor, SensorError, SensorState, SensorStatus};
pub use simulated::{SimulatedCamera, SimulatedCameraConfig};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::config::{CameraConfig, CameraSource};

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera capture failed: {0}")]
    Capture(String),

    #[error("no free frame buffer ({0} in use)")]
    NoFreeBuffer(usize),

    #[error("unsupported frame size index: {0}")]
    FrameSize(i32),

    #[error("camera source unavailable: {0}")]
    Unavailable(String),
}

/// Pixel layout of a frame buffer payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Jpeg,
    /// 16 bits per pixel, big-endian
    Rgb565,
    /// 24 bits per pixel, R then G then B
    Rgb888,
    /// YUYV, 16 bits per pixel
    Yuv422,
    Grayscale,
}

impl PixelFormat {
    /// Bytes per pixel for raw formats, `None` for compressed payloads
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Jpeg => None,
            PixelFormat::Rgb565 | PixelFormat::Yuv422 => Some(2),
            PixelFormat::Rgb888 => Some(3),
            PixelFormat::Grayscale => Some(1),
        }
    }

    pub fn is_jpeg(self) -> bool {
        self == PixelFormat::Jpeg
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Jpeg => "jpeg",
            PixelFormat::Rgb565 => "rgb565",
            PixelFormat::Rgb888 => "rgb888",
            PixelFormat::Yuv422 => "yuv422",
            PixelFormat::Grayscale => "grayscale",
        };
        f.write_str(name)
    }
}

/// Frame dimensions indexed by the sensor `framesize` setting
pub const FRAME_SIZES: [(u32, u32); 14] = [
    (96, 96),
    (160, 120),
    (176, 144),
    (240, 176),
    (240, 240),
    (320, 240),
    (400, 296),
    (480, 320),
    (640, 480),
    (800, 600),
    (1024, 768),
    (1280, 720),
    (1280, 1024),
    (1600, 1200),
];

/// Largest valid `framesize` index
pub const MAX_FRAME_SIZE: i32 = FRAME_SIZES.len() as i32 - 1;

/// Width and height for a `framesize` index
pub fn frame_dimensions(index: i32) -> Option<(u32, u32)> {
    usize::try_from(index)
        .ok()
        .and_then(|i| FRAME_SIZES.get(i).copied())
}

/// One captured image, owned by the camera between acquisition and release
#[derive(Debug)]
pub struct FrameBuffer {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub timestamp: Instant,
}

impl FrameBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Source of frames and the sensor behind them
pub trait Camera: Send + Sync {
    /// Blocks until the next frame is available
    fn acquire(&self) -> Result<FrameBuffer, CameraError>;

    /// Hands a frame buffer back to the camera
    fn release(&self, frame: FrameBuffer);

    fn sensor(&self) -> &dyn Sensor;
}

/// A borrowed frame that goes back to its camera when dropped
///
/// Every path out of a capture or stream iteration drops the lease exactly
/// once, so buffers cannot leak on error paths.
pub struct FrameLease<'a> {
    camera: &'a dyn Camera,
    frame: Option<FrameBuffer>,
}

impl<'a> FrameLease<'a> {
    pub fn acquire(camera: &'a dyn Camera) -> Result<Self, CameraError> {
        let frame = camera.acquire()?;
        if frame.is_empty() {
            camera.release(frame);
            return Err(CameraError::Capture("empty frame".to_string()));
        }
        Ok(Self {
            camera,
            frame: Some(frame),
        })
    }

    pub fn frame(&self) -> &FrameBuffer {
        // Only `drop` takes the frame out
        self.frame.as_ref().unwrap_or_else(|| unreachable!())
    }

    pub fn format(&self) -> PixelFormat {
        self.frame().format
    }

    pub fn data(&self) -> &[u8] {
        &self.frame().data
    }
}

impl Drop for FrameLease<'_> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.camera.release(frame);
        }
    }
}

/// Builds the camera selected by the configuration
pub fn open_camera(config: &CameraConfig) -> Result<Arc<dyn Camera>, CameraError> {
    match config.source {
        CameraSource::Simulated => {
            let camera = SimulatedCamera::new(SimulatedCameraConfig::from(config))?;
            Ok(Arc::new(camera))
        }
        #[cfg(feature = "gstreamer")]
        CameraSource::Gstreamer => Ok(Arc::new(GstCamera::new(config)?)),
        #[cfg(not(feature = "gstreamer"))]
        CameraSource::Gstreamer => Err(CameraError::Unavailable(
            "built without the `gstreamer` feature".to_string(),
        )),
    }
}
