//! Running average over a fixed window of samples
//!
//! Used by the stream loop to smooth frame intervals for the fps readout.
//! The window is a ring buffer; the running sum is kept incrementally so each
//! update is O(1).

use std::collections::TryReserveError;
use tracing::warn;

/// Default window used for frame interval smoothing
pub const DEFAULT_WINDOW: usize = 20;

/// Fixed-capacity running average
///
/// A filter without storage (zero capacity or a failed allocation) passes
/// every sample through unchanged.
#[derive(Debug, Clone)]
pub struct RunningAverage {
    values: Option<Box<[i64]>>,
    index: usize,
    count: usize,
    sum: i64,
}

impl RunningAverage {
    /// Allocates a zeroed window of `capacity` samples
    pub fn try_new(capacity: usize) -> Result<Self, TryReserveError> {
        if capacity == 0 {
            return Ok(Self::passthrough());
        }

        let mut values = Vec::new();
        values.try_reserve_exact(capacity)?;
        values.resize(capacity, 0);

        Ok(Self {
            values: Some(values.into_boxed_slice()),
            index: 0,
            count: 0,
            sum: 0,
        })
    }

    /// Like [`RunningAverage::try_new`], falling back to a pass-through
    /// filter when the window cannot be allocated
    pub fn new(capacity: usize) -> Self {
        match Self::try_new(capacity) {
            Ok(filter) => filter,
            Err(e) => {
                warn!(capacity = %capacity, error = %e, "Running average disabled");
                Self::passthrough()
            }
        }
    }

    /// Filter with no storage; returns every sample as-is
    pub fn passthrough() -> Self {
        Self {
            values: None,
            index: 0,
            count: 0,
            sum: 0,
        }
    }

    /// Feeds one sample and returns the average of the samples in the window
    pub fn run(&mut self, sample: i64) -> i64 {
        let Some(values) = self.values.as_mut() else {
            return sample;
        };

        self.sum -= values[self.index];
        values[self.index] = sample;
        self.sum += sample;
        self.index = (self.index + 1) % values.len();
        if self.count < values.len() {
            self.count += 1;
        }

        self.sum / self.count as i64
    }

    /// Window size (0 for a pass-through filter)
    pub fn capacity(&self) -> usize {
        self.values.as_ref().map_or(0, |v| v.len())
    }

    /// Number of samples currently in the window
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_passthrough(&self) -> bool {
        self.values.is_none()
    }
}

impl Default for RunningAverage {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
