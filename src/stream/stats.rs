//! Frame timing and session statistics

use serde::Serialize;

/// Timing readout for one emitted frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FrameTiming {
    /// JPEG payload size
    pub bytes: usize,

    /// Milliseconds since the previous frame
    pub frame_ms: i64,

    /// Smoothed interval from the running average
    pub avg_frame_ms: i64,
}

impl FrameTiming {
    /// Instantaneous frame rate
    pub fn fps(&self) -> f64 {
        fps_from_interval(self.frame_ms)
    }

    /// Frame rate from the smoothed interval
    pub fn avg_fps(&self) -> f64 {
        fps_from_interval(self.avg_frame_ms)
    }
}

fn fps_from_interval(ms: i64) -> f64 {
    if ms <= 0 {
        return 0.0;
    }
    1000.0 / ms as f64
}

/// Totals for one stream session
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    /// Frames written completely (header, body and boundary)
    pub frames_sent: u64,

    /// JPEG bytes written
    pub bytes_sent: u64,

    /// Timing of the most recent frame
    pub last: Option<FrameTiming>,
}

impl SessionStats {
    pub fn record(&mut self, timing: FrameTiming) {
        self.frames_sent += 1;
        self.bytes_sent += timing.bytes as u64;
        self.last = Some(timing);
    }

    /// Average JPEG size over the session
    pub fn avg_frame_bytes(&self) -> u64 {
        if self.frames_sent == 0 {
            return 0;
        }
        self.bytes_sent / self.frames_sent
    }
}
