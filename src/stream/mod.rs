//! MJPEG streaming loop
//!
//! One [`StreamSession`] serves one client. Each iteration leases a frame,
//! turns it into JPEG bytes and writes three chunks: the part header, the
//! JPEG payload and the boundary. The frame (or its compressed copy) is
//! released before the next acquisition on every path. The loop only ends
//! on an error, normally when the client goes away and a chunk write fails.

mod stats;

pub use stats::{FrameTiming, SessionStats};

use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

use crate::camera::{Camera, CameraError, FrameLease};
use crate::encoder::{self, EncodeError};
use crate::filter::RunningAverage;
use crate::sink::{ChunkSink, SinkError};

/// Multipart boundary token
pub const PART_BOUNDARY: &str = "123456789000000000000987654321";

/// Content type of the `/stream` response
pub const STREAM_CONTENT_TYPE: &str =
    "multipart/x-mixed-replace;boundary=123456789000000000000987654321";

/// Delimiter written after every JPEG part
pub const STREAM_BOUNDARY: &str = "\r\n--123456789000000000000987654321\r\n";

/// Value of the `X-Framerate` response header
pub const STREAM_FRAMERATE_HINT: &str = "60";

const PROGRESS_INTERVAL: u64 = 100;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("encoding error: {0}")]
    Encode(#[from] EncodeError),

    #[error("transport error: {0}")]
    Transport(#[from] SinkError),
}

impl StreamError {
    /// True when the client side went away
    pub fn is_disconnect(&self) -> bool {
        matches!(self, StreamError::Transport(_))
    }
}

/// Header that precedes each JPEG part
pub fn part_header(jpeg_len: usize) -> String {
    format!(
        "Content-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg_len
    )
}

/// Writes one multipart part; stops at the first failed chunk
pub fn write_part<S: ChunkSink + ?Sized>(sink: &mut S, jpeg: &[u8]) -> Result<(), SinkError> {
    sink.send_chunk(part_header(jpeg.len()).as_bytes())?;
    sink.send_chunk(jpeg)?;
    sink.send_chunk(STREAM_BOUNDARY.as_bytes())?;
    Ok(())
}

/// Streaming state for one client
pub struct StreamSession<'a> {
    camera: &'a dyn Camera,
    quality: u8,
    filter: RunningAverage,
    last_frame: Option<Instant>,
    stats: SessionStats,
}

impl<'a> StreamSession<'a> {
    pub fn new(camera: &'a dyn Camera, quality: u8, filter: RunningAverage) -> Self {
        Self {
            camera,
            quality,
            filter,
            last_frame: None,
            stats: SessionStats::default(),
        }
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Time of the previous frame; only set while [`StreamSession::run`] is active
    pub fn last_frame(&self) -> Option<Instant> {
        self.last_frame
    }

    /// Streams frames into `sink` until something fails
    ///
    /// Returns the error that ended the session.
    pub fn run<S: ChunkSink + ?Sized>(&mut self, sink: &mut S) -> StreamError {
        self.last_frame = Some(Instant::now());

        let err = loop {
            match self.stream_frame(sink) {
                Ok(bytes) => self.record_frame(bytes),
                Err(e) => break e,
            }
        };

        self.last_frame = None;
        err
    }

    /// Runs one iteration: acquire, encode, emit
    ///
    /// Returns the JPEG size on success.
    pub fn stream_frame<S: ChunkSink + ?Sized>(&mut self, sink: &mut S) -> Result<usize, StreamError> {
        let lease = FrameLease::acquire(self.camera)?;
        let jpeg = encoder::into_jpeg(lease, self.quality)?;
        write_part(sink, jpeg.as_bytes())?;
        Ok(jpeg.len())
    }

    fn record_frame(&mut self, bytes: usize) {
        let now = Instant::now();
        let previous = self.last_frame.replace(now).unwrap_or(now);
        let frame_ms = i64::try_from(now.duration_since(previous).as_millis()).unwrap_or(i64::MAX);
        let avg_frame_ms = self.filter.run(frame_ms);

        let timing = FrameTiming {
            bytes,
            frame_ms,
            avg_frame_ms,
        };
        self.stats.record(timing);

        debug!(
            bytes = %bytes,
            frame_ms = %frame_ms,
            fps = %format!("{:.1}", timing.fps()),
            avg_ms = %avg_frame_ms,
            avg_fps = %format!("{:.1}", timing.avg_fps()),
            "MJPG frame"
        );

        if self.stats.frames_sent % PROGRESS_INTERVAL == 0 {
            info!(
                frames = %self.stats.frames_sent,
                bytes = %self.stats.bytes_sent,
                avg_fps = %format!("{:.1}", timing.avg_fps()),
                "Streaming progress"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{
        FrameBuffer, PixelFormat, Sensor, SensorState, SimulatedCamera, SimulatedCameraConfig,
    };
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        chunks: Vec<Vec<u8>>,
        fail_at: Option<usize>,
        attempts: usize,
    }

    impl ChunkSink for RecordingSink {
        fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
            let n = self.attempts;
            self.attempts += 1;
            if self.fail_at == Some(n) {
                return Err(SinkError::Closed);
            }
            self.chunks.push(chunk.to_vec());
            Ok(())
        }
    }

    /// Hands out RGB888 frames whose payload is too short for their size
    struct TruncatedCamera {
        sensor: SensorState,
        acquired: AtomicU64,
        released: AtomicU64,
    }

    impl TruncatedCamera {
        fn new() -> Self {
            Self {
                sensor: SensorState::new(PixelFormat::Rgb888, 0, 12),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }
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

    fn camera(format: PixelFormat) -> SimulatedCamera {
        SimulatedCamera::new(SimulatedCameraConfig {
            pixel_format: format,
            frame_size: 0,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_boundary_constants_agree() {
        assert_eq!(PART_BOUNDARY.len(), 30);
        assert!(STREAM_CONTENT_TYPE.ends_with(PART_BOUNDARY));
        assert_eq!(STREAM_BOUNDARY, format!("\r\n--{}\r\n", PART_BOUNDARY));
    }

    #[test]
    fn test_part_header() {
        assert_eq!(
            part_header(1234),
            "Content-Type: image/jpeg\r\nContent-Length: 1234\r\n\r\n"
        );
    }

    #[test]
    fn test_frame_emits_three_chunks() {
        let cam = camera(PixelFormat::Jpeg);
        let mut session = StreamSession::new(&cam, 80, RunningAverage::new(20));
        let mut sink = RecordingSink::default();

        let len = session.stream_frame(&mut sink).unwrap();

        assert_eq!(sink.chunks.len(), 3);
        assert_eq!(sink.chunks[0], part_header(len).into_bytes());
        assert_eq!(sink.chunks[1].len(), len);
        assert_eq!(&sink.chunks[1][..2], &[0xFF, 0xD8]);
        assert_eq!(sink.chunks[2], STREAM_BOUNDARY.as_bytes());
        assert_eq!(cam.in_use(), 0);
    }

    #[test]
    fn test_header_failure_emits_nothing_else() {
        let cam = camera(PixelFormat::Jpeg);
        let mut session = StreamSession::new(&cam, 80, RunningAverage::new(20));
        let mut sink = RecordingSink {
            fail_at: Some(0),
            ..Default::default()
        };

        let err = session.stream_frame(&mut sink).unwrap_err();
        assert!(err.is_disconnect());
        assert_eq!(sink.attempts, 1);
        assert!(sink.chunks.is_empty());
        assert_eq!(cam.acquired(), 1);
        assert_eq!(cam.released(), 1);
    }

    #[test]
    fn test_release_on_every_failure_point() {
        for format in [PixelFormat::Jpeg, PixelFormat::Rgb565] {
            for fail_at in 0..3 {
                let cam = camera(format);
                let mut session = StreamSession::new(&cam, 80, RunningAverage::new(20));
                let mut sink = RecordingSink {
                    fail_at: Some(fail_at),
                    ..Default::default()
                };

                assert!(session.stream_frame(&mut sink).is_err());
                assert_eq!(sink.chunks.len(), fail_at);
                assert_eq!(cam.in_use(), 0, "{} fail_at {}", format, fail_at);
                assert_eq!(cam.acquired(), cam.released());
            }
        }
    }

    #[test]
    fn test_encode_failure_releases_frame() {
        let cam = TruncatedCamera::new();
        let mut session = StreamSession::new(&cam, 80, RunningAverage::new(20));
        let mut sink = RecordingSink::default();

        let err = session.stream_frame(&mut sink).unwrap_err();

        assert!(matches!(
            err,
            StreamError::Encode(EncodeError::BufferSize { actual: 100, .. })
        ));
        assert!(!err.is_disconnect());
        assert_eq!(sink.attempts, 0);
        assert_eq!(cam.acquired.load(Ordering::Relaxed), 1);
        assert_eq!(cam.released.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_encode_failure_ends_session() {
        let cam = TruncatedCamera::new();
        let mut session = StreamSession::new(&cam, 80, RunningAverage::new(20));
        let mut sink = RecordingSink::default();

        let err = session.run(&mut sink);

        assert!(matches!(err, StreamError::Encode(_)));
        assert_eq!(session.stats().frames_sent, 0);
        assert!(sink.chunks.is_empty());
        assert_eq!(
            cam.acquired.load(Ordering::Relaxed),
            cam.released.load(Ordering::Relaxed)
        );
        assert!(session.last_frame().is_none());
    }

    #[test]
    fn test_run_until_disconnect() {
        let cam = camera(PixelFormat::Grayscale);
        let mut session = StreamSession::new(&cam, 80, RunningAverage::new(20));
        // Five full frames, then the header of the sixth fails
        let mut sink = RecordingSink {
            fail_at: Some(15),
            ..Default::default()
        };

        let err = session.run(&mut sink);

        assert!(err.is_disconnect());
        assert_eq!(session.stats().frames_sent, 5);
        assert_eq!(sink.chunks.len(), 15);
        assert_eq!(cam.acquired(), 6);
        assert_eq!(cam.released(), 6);
        assert!(session.last_frame().is_none());
    }

    #[test]
    fn test_camera_failure_ends_session() {
        let cam = camera(PixelFormat::Jpeg);
        cam.inject_faults(1);
        let mut session = StreamSession::new(&cam, 80, RunningAverage::new(20));
        let mut sink = RecordingSink::default();

        let err = session.run(&mut sink);

        assert!(matches!(err, StreamError::Camera(_)));
        assert!(!err.is_disconnect());
        assert!(sink.chunks.is_empty());
        assert_eq!(cam.in_use(), 0);
    }

    #[test]
    fn test_sessions_restart_timing() {
        let cam = camera(PixelFormat::Jpeg);
        let mut session = StreamSession::new(&cam, 80, RunningAverage::new(20));

        let mut sink = RecordingSink {
            fail_at: Some(6),
            ..Default::default()
        };
        session.run(&mut sink);
        assert!(session.last_frame().is_none());

        let mut sink = RecordingSink {
            fail_at: Some(3),
            ..Default::default()
        };
        session.run(&mut sink);
        assert_eq!(session.stats().frames_sent, 3);
        assert!(session.last_frame().is_none());
    }
}
