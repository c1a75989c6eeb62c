//! Bounded sample window for motion magnitudes.
//!
//! One buffer backs two views: the long window (the whole buffer, used for
//! stillness and threshold decisions) and the short view (a suffix of the
//! buffer, used for the responsive motion level).

use crate::sources::types::MotionSample;
use statrs::statistics::Statistics;
use std::collections::VecDeque;

/// FIFO buffer of the most recent `capacity` motion samples.
#[derive(Debug, Clone)]
pub struct MotionWindow {
    samples: VecDeque<MotionSample>,
    capacity: usize,
    short_len: usize,
}

impl MotionWindow {
    /// Create a window holding `capacity` samples with a `short_len` suffix view.
    ///
    /// `short_len` is capped at `capacity`.
    pub fn new(capacity: usize, short_len: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            short_len: short_len.clamp(1, capacity),
        }
    }

    /// Append a sample, evicting the oldest ones beyond capacity.
    pub fn push(&mut self, sample: MotionSample) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Number of buffered samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample has been buffered.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether the buffer holds `capacity` samples.
    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// Maximum number of buffered samples.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every sample.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Newest sample, if any.
    pub fn latest(&self) -> Option<&MotionSample> {
        self.samples.back()
    }

    /// Magnitudes of the whole buffer, oldest first.
    pub fn long_view(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.magnitude)
    }

    /// Magnitudes of the last `short_len` samples, oldest first.
    pub fn short_view(&self) -> impl Iterator<Item = f64> + '_ {
        let skip = self.samples.len().saturating_sub(self.short_len);
        self.samples.iter().skip(skip).map(|s| s.magnitude)
    }

    /// Mean of the long view, `None` when empty.
    pub fn long_mean(&self) -> Option<f64> {
        mean(self.long_view())
    }

    /// Mean of the short view, `None` when empty.
    pub fn short_mean(&self) -> Option<f64> {
        mean(self.short_view())
    }

    /// Population mean and standard deviation of the long view.
    pub fn long_mean_and_std_dev(&self) -> Option<(f64, f64)> {
        if self.samples.is_empty() {
            return None;
        }
        let values: Vec<f64> = self.long_view().collect();
        let mean = values.iter().mean();
        let std_dev = values.iter().population_std_dev();
        Some((mean, if std_dev.is_nan() { 0.0 } else { std_dev }))
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().mean())
    }
}
