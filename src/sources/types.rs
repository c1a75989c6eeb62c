//! Timestamped readings exchanged with acquisition sources.
//!
//! Sources deliver raw values only. Gravity removal, smoothing and
//! thresholding are the processors' job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One standard gravity, in g.
pub const STANDARD_GRAVITY_G: f64 = 1.0;

/// A raw 3-axis accelerometer reading, in g.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelerationSample {
    /// Timestamp when the sample was taken
    pub timestamp: DateTime<Utc>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelerationSample {
    /// Create a sample from axis readings in g.
    pub fn new(timestamp: DateTime<Utc>, x: f64, y: f64, z: f64) -> Self {
        Self { timestamp, x, y, z }
    }

    /// Motion magnitude with gravity removed: `| ‖a‖ − 1g |`.
    pub fn magnitude(&self) -> f64 {
        let norm = (self.x * self.x + self.y * self.y + self.z * self.z).sqrt();
        (norm - STANDARD_GRAVITY_G).abs()
    }

    /// Convert into a scalar motion sample.
    pub fn to_motion_sample(&self) -> MotionSample {
        MotionSample {
            timestamp: self.timestamp,
            magnitude: self.magnitude(),
        }
    }
}

/// A gravity-removed motion magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub timestamp: DateTime<Utc>,
    /// Magnitude in g
    pub magnitude: f64,
}

impl MotionSample {
    pub fn new(timestamp: DateTime<Utc>, magnitude: f64) -> Self {
        Self {
            timestamp,
            magnitude,
        }
    }
}

/// Biometric metrics the engine asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiometricMetric {
    /// Heart-rate variability, standard deviation of NN intervals
    HrvSdnn,
}

/// A single HRV measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HrvReading {
    /// End time of the measurement
    pub timestamp: DateTime<Utc>,
    /// SDNN in milliseconds
    pub value_ms: f64,
}

impl HrvReading {
    /// Create a reading from a value in ms.
    pub fn new(timestamp: DateTime<Utc>, value_ms: f64) -> Self {
        Self {
            timestamp,
            value_ms,
        }
    }

    /// A reading is usable when it is finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        self.value_ms.is_finite() && self.value_ms > 0.0
    }
}
