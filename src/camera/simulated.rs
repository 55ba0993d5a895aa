//! Test-pattern camera
//!
//! Renders moving color bars into a fixed pool of frame buffers. Like a real
//! camera driver, acquisition waits for a buffer to come back when all of
//! them are leased and gives up with `NoFreeBuffer` after a timeout, which
//! makes leaked frames visible.

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{frame_dimensions, Camera, CameraError, FrameBuffer, PixelFormat, Sensor, SensorState};
use crate::config::CameraConfig;

/// Buffer wait used when the configuration does not set one
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(4);

/// Settings for [`SimulatedCamera`]
#[derive(Debug, Clone)]
pub struct SimulatedCameraConfig {
    pub pixel_format: PixelFormat,
    /// Index into the frame size table
    pub frame_size: i32,
    /// Sensor JPEG quality (0-63, lower is better)
    pub quality: i32,
    pub fb_count: usize,
    /// Frame rate limit, 0 for unpaced capture
    pub fps: u32,
    /// How long an acquisition waits for a leased buffer to come back
    pub acquire_timeout: Duration,
}

impl Default for SimulatedCameraConfig {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Jpeg,
            frame_size: 8,
            quality: 12,
            fb_count: 2,
            fps: 0,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

impl From<&CameraConfig> for SimulatedCameraConfig {
    fn from(config: &CameraConfig) -> Self {
        Self {
            pixel_format: config.pixel_format,
            frame_size: config.frame_size,
            quality: config.quality,
            fb_count: config.fb_count,
            fps: config.fps,
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
        }
    }
}

/// Camera that synthesizes frames
pub struct SimulatedCamera {
    sensor: SensorState,
    fb_count: usize,
    frame_interval: Option<Duration>,
    acquire_timeout: Duration,

    free: Mutex<Vec<Vec<u8>>>,
    buffer_returned: Condvar,
    next_frame: Mutex<Instant>,
    pending_faults: AtomicUsize,

    // Statistics
    frame_count: AtomicU64,
    release_count: AtomicU64,
    in_use: AtomicUsize,
}

impl SimulatedCamera {
    pub fn new(config: SimulatedCameraConfig) -> Result<Self, CameraError> {
        if frame_dimensions(config.frame_size).is_none() {
            return Err(CameraError::FrameSize(config.frame_size));
        }

        let fb_count = config.fb_count.max(1);
        let frame_interval =
            (config.fps > 0).then(|| Duration::from_secs(1) / config.fps);

        info!(
            format = %config.pixel_format,
            frame_size = %config.frame_size,
            fb_count = %fb_count,
            fps = %config.fps,
            "Simulated camera ready"
        );

        Ok(Self {
            sensor: SensorState::new(config.pixel_format, config.frame_size, config.quality),
            fb_count,
            frame_interval,
            acquire_timeout: config.acquire_timeout,
            free: Mutex::new((0..fb_count).map(|_| Vec::new()).collect()),
            buffer_returned: Condvar::new(),
            next_frame: Mutex::new(Instant::now()),
            pending_faults: AtomicUsize::new(0),
            frame_count: AtomicU64::new(0),
            release_count: AtomicU64::new(0),
            in_use: AtomicUsize::new(0),
        })
    }

    /// Makes the next `count` acquisitions fail
    pub fn inject_faults(&self, count: usize) {
        self.pending_faults.fetch_add(count, Ordering::Relaxed);
    }

    /// Frames successfully handed out
    pub fn acquired(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Frames handed back
    pub fn released(&self) -> u64 {
        self.release_count.load(Ordering::Relaxed)
    }

    /// Frames currently held by callers
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Pops a free buffer, waiting up to the acquire timeout for a release
    fn take_buffer(&self) -> Result<Vec<u8>, CameraError> {
        let deadline = Instant::now() + self.acquire_timeout;
        let mut free = self.free.lock();
        loop {
            if let Some(buf) = free.pop() {
                return Ok(buf);
            }
            if self.buffer_returned.wait_until(&mut free, deadline).timed_out() {
                return free.pop().ok_or(CameraError::NoFreeBuffer(self.fb_count));
            }
        }
    }

    fn return_buffer(&self, buf: Vec<u8>) {
        self.free.lock().push(buf);
        self.buffer_returned.notify_one();
    }

    fn take_fault(&self) -> bool {
        self.pending_faults
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }

    fn wait_for_frame(&self) {
        let Some(interval) = self.frame_interval else {
            return;
        };

        let due = {
            let mut next = self.next_frame.lock();
            let now = Instant::now();
            let due = (*next).max(now);
            *next = due + interval;
            due
        };

        let now = Instant::now();
        if due > now {
            std::thread::sleep(due - now);
        }
    }

    fn render(&self, seq: u64, buf: &mut Vec<u8>) -> Result<(u32, u32), CameraError> {
        let status = self.sensor.status();
        let (width, height) = frame_dimensions(status.framesize)
            .ok_or(CameraError::FrameSize(status.framesize))?;

        let pattern = Pattern {
            width,
            height,
            shift: (seq.wrapping_mul(4) % u64::from(width)) as u32,
            bars: status.colorbar != 0,
            mirror: status.hmirror != 0,
            flip: self.sensor.vflip(),
            brightness: status.brightness * 24,
        };

        buf.clear();
        match self.sensor.pixel_format() {
            PixelFormat::Jpeg => {
                let mut rgb = Vec::with_capacity((width * height * 3) as usize);
                pattern.fill(&mut rgb, |out, (r, g, b)| out.extend_from_slice(&[r, g, b]));
                let quality = (100 - status.quality * 3 / 2).clamp(1, 100) as u8;
                JpegEncoder::new_with_quality(&mut *buf, quality)
                    .write_image(&rgb, width, height, ExtendedColorType::Rgb8)
                    .map_err(|e| CameraError::Capture(format!("JPEG encode failed: {}", e)))?;
            }
            PixelFormat::Rgb888 => {
                pattern.fill(buf, |out, (r, g, b)| out.extend_from_slice(&[r, g, b]));
            }
            PixelFormat::Rgb565 => {
                pattern.fill(buf, |out, (r, g, b)| {
                    let px = (u16::from(r) >> 3) << 11 | (u16::from(g) >> 2) << 5 | u16::from(b) >> 3;
                    out.extend_from_slice(&px.to_be_bytes());
                });
            }
            PixelFormat::Grayscale => {
                pattern.fill(buf, |out, rgb| out.push(luma(rgb)));
            }
            PixelFormat::Yuv422 => {
                let mut rgb = Vec::with_capacity((width * height * 3) as usize);
                pattern.fill(&mut rgb, |out, (r, g, b)| out.extend_from_slice(&[r, g, b]));
                for pair in rgb.chunks_exact(6) {
                    let p0 = (pair[0], pair[1], pair[2]);
                    let p1 = (pair[3], pair[4], pair[5]);
                    let avg = (
                        ((u16::from(p0.0) + u16::from(p1.0)) / 2) as u8,
                        ((u16::from(p0.1) + u16::from(p1.1)) / 2) as u8,
                        ((u16::from(p0.2) + u16::from(p1.2)) / 2) as u8,
                    );
                    let (u, v) = chroma(avg);
                    buf.extend_from_slice(&[luma(p0), u, luma(p1), v]);
                }
            }
        }

        Ok((width, height))
    }
}

impl Camera for SimulatedCamera {
    fn acquire(&self) -> Result<FrameBuffer, CameraError> {
        self.wait_for_frame();

        if self.take_fault() {
            return Err(CameraError::Capture("sensor did not deliver a frame".to_string()));
        }

        let mut data = self.take_buffer()?;

        let seq = self.frame_count.load(Ordering::Relaxed);
        let (width, height) = match self.render(seq, &mut data) {
            Ok(dims) => dims,
            Err(e) => {
                self.return_buffer(data);
                return Err(e);
            }
        };

        self.frame_count.fetch_add(1, Ordering::Relaxed);
        self.in_use.fetch_add(1, Ordering::Relaxed);
        debug!(seq = %seq, bytes = %data.len(), "Frame captured");

        Ok(FrameBuffer {
            format: self.sensor.pixel_format(),
            width,
            height,
            data,
            timestamp: Instant::now(),
        })
    }

    fn release(&self, frame: FrameBuffer) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        self.release_count.fetch_add(1, Ordering::Relaxed);
        self.return_buffer(frame.data);
    }

    fn sensor(&self) -> &dyn Sensor {
        &self.sensor
    }
}

struct Pattern {
    width: u32,
    height: u32,
    shift: u32,
    bars: bool,
    mirror: bool,
    flip: bool,
    brightness: i32,
}

const BARS: [(u8, u8, u8); 8] = [
    (255, 255, 255),
    (255, 255, 0),
    (0, 255, 255),
    (0, 255, 0),
    (255, 0, 255),
    (255, 0, 0),
    (0, 0, 255),
    (0, 0, 0),
];

impl Pattern {
    fn fill<F>(&self, out: &mut Vec<u8>, mut put: F)
    where
        F: FnMut(&mut Vec<u8>, (u8, u8, u8)),
    {
        for row in 0..self.height {
            let y = if self.flip { self.height - 1 - row } else { row };
            for col in 0..self.width {
                let x = if self.mirror { self.width - 1 - col } else { col };
                put(out, self.pixel(x, y));
            }
        }
    }

    fn pixel(&self, x: u32, y: u32) -> (u8, u8, u8) {
        let (r, g, b) = if self.bars {
            BARS[(x * 8 / self.width) as usize]
        } else {
            let xs = x.wrapping_add(self.shift) % self.width;
            (
                (xs * 255 / self.width) as u8,
                (y * 255 / self.height) as u8,
                ((xs + y) & 0xFF) as u8,
            )
        };
        let adjust = |c: u8| (i32::from(c) + self.brightness).clamp(0, 255) as u8;
        (adjust(r), adjust(g), adjust(b))
    }
}

fn luma((r, g, b): (u8, u8, u8)) -> u8 {
    ((77 * u32::from(r) + 150 * u32::from(g) + 29 * u32::from(b)) >> 8) as u8
}

fn chroma((r, g, b): (u8, u8, u8)) -> (u8, u8) {
    let (r, g, b) = (i32::from(r), i32::from(g), i32::from(b));
    let u = ((-43 * r - 85 * g + 128 * b) >> 8) + 128;
    let v = ((128 * r - 107 * g - 21 * b) >> 8) + 128;
    (u.clamp(0, 255) as u8, v.clamp(0, 255) as u8)
}
