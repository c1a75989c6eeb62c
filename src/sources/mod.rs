//! Acquisition collaborators for the sleep-onset engine.
//!
//! The engine never talks to platform sensor APIs directly. It consumes
//! these contracts, which a host application implements on top of its
//! health store, accelerometer and haptics. [`simulated`] provides
//! in-process implementations for tests, the CLI and demos.

pub mod simulated;
pub mod types;

use crate::error::SourceError;
use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use std::time::Duration;

// Re-export commonly used types
pub use simulated::{
    RecordingWakeSignal, ScriptedBiometricSource, SimulatedMotionSource, StillnessProfile, WakeRecord,
};
pub use types::{AccelerationSample, BiometricMetric, HrvReading, MotionSample};

/// Historical and live access to biometric readings.
pub trait BiometricSource: Send + Sync {
    /// Ask the user for read access. Never retried by the engine.
    fn request_authorization(&self) -> bool;

    /// Mean of `metric` over `[start, end)`, `None` when there are no samples.
    fn query_average(
        &self,
        metric: BiometricMetric,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<f64>, SourceError>;

    /// All samples of `metric` over `[start, end)`.
    fn query_samples(
        &self,
        metric: BiometricMetric,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HrvReading>, SourceError>;

    /// Most recent sample within `lookback` of now.
    fn observe_latest(
        &self,
        metric: BiometricMetric,
        lookback: Duration,
    ) -> Result<Option<HrvReading>, SourceError>;

    /// Payload-free update signal; consumers re-query on every event.
    fn subscribe_updates(&self, metric: BiometricMetric) -> Result<Receiver<()>, SourceError>;

    fn enable_background_delivery(&self, metric: BiometricMetric) -> Result<(), SourceError>;

    fn disable_background_delivery(&self, metric: BiometricMetric) -> Result<(), SourceError>;
}

/// Live accelerometer access.
pub trait MotionSource: Send + Sync {
    fn is_available(&self) -> bool;

    /// Start delivering samples at the given nominal interval.
    fn subscribe(&self, interval: Duration) -> Result<Receiver<AccelerationSample>, SourceError>;

    /// Stop delivery. The subscription's channel disconnects.
    fn unsubscribe(&self);
}

/// Wake-up output driven by the session layer.
pub trait WakeSignal: Send + Sync {
    fn trigger(&self, strength: u8, with_sound: bool);
}
