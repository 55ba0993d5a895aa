//! GStreamer-backed camera
//!
//! Frames are pulled synchronously from an `appsink` at the end of a
//! `v4l2src` pipeline. JPEG frames come from `jpegenc`; raw formats are
//! converted by `videoconvert`.

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{frame_dimensions, Camera, CameraError, FrameBuffer, PixelFormat, Sensor, SensorState};
use crate::config::CameraConfig;

pub struct GstCamera {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    sensor: SensorState,
    width: u32,
    height: u32,
}

impl GstCamera {
    pub fn new(config: &CameraConfig) -> Result<Self, CameraError> {
        gst::init().map_err(|e| CameraError::Unavailable(e.to_string()))?;

        let (width, height) =
            frame_dimensions(config.frame_size).ok_or(CameraError::FrameSize(config.frame_size))?;

        let pipe_description = build_pipeline(config, width, height)?;
        debug!(pipeline = %pipe_description, "Creating GStreamer pipeline");

        let pipeline = gst::parse::launch(&pipe_description)
            .map_err(|e| CameraError::Unavailable(format!("{}: {}", pipe_description, e)))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| CameraError::Unavailable("Parsed element is not a gst::Pipeline".to_string()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| CameraError::Unavailable("Element 'sink' not found".to_string()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| CameraError::Unavailable("Element 'sink' is not an appsink".to_string()))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CameraError::Unavailable(format!("Failed to start pipeline: {:?}", e)))?;

        info!(
            device = %config.device,
            format = %config.pixel_format,
            resolution = %format!("{}x{}", width, height),
            "GStreamer camera started"
        );

        Ok(Self {
            pipeline,
            appsink,
            sensor: SensorState::new(config.pixel_format, config.frame_size, config.quality),
            width,
            height,
        })
    }
}

fn build_pipeline(config: &CameraConfig, width: u32, height: u32) -> Result<String, CameraError> {
    let source = format!(
        "v4l2src device={} ! video/x-raw,width={},height={},framerate={}/1 ! videoconvert",
        config.device,
        width,
        height,
        config.fps.max(1)
    );

    let tail = match config.pixel_format {
        PixelFormat::Jpeg => {
            let quality = (100 - config.quality * 3 / 2).clamp(1, 100);
            format!("jpegenc quality={}", quality)
        }
        PixelFormat::Rgb888 => "video/x-raw,format=RGB".to_string(),
        PixelFormat::Yuv422 => "video/x-raw,format=YUY2".to_string(),
        PixelFormat::Grayscale => "video/x-raw,format=GRAY8".to_string(),
        PixelFormat::Rgb565 => {
            return Err(CameraError::Unavailable(
                "rgb565 is not available from the GStreamer source".to_string(),
            ))
        }
    };

    Ok(format!(
        "{} ! {} ! appsink name=sink max-buffers={} drop=true sync=false",
        source,
        tail,
        config.fb_count.max(1)
    ))
}

impl Camera for GstCamera {
    fn acquire(&self) -> Result<FrameBuffer, CameraError> {
        let sample = self
            .appsink
            .pull_sample()
            .map_err(|_| CameraError::Capture("Failed to pull sample from appsink".to_string()))?;

        let buffer = sample
            .buffer()
            .ok_or_else(|| CameraError::Capture("Sample had no buffer".to_string()))?;
        let map = buffer
            .map_readable()
            .map_err(|_| CameraError::Capture("Unable to map buffer".to_string()))?;

        Ok(FrameBuffer {
            format: self.sensor.pixel_format(),
            width: self.width,
            height: self.height,
            data: map.as_slice().to_vec(),
            timestamp: Instant::now(),
        })
    }

    fn release(&self, frame: FrameBuffer) {
        drop(frame);
    }

    fn sensor(&self) -> &dyn Sensor {
        &self.sensor
    }
}

impl Drop for GstCamera {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop camera pipeline: {:?}", e);
        }
    }
}
