//! napwatch - sleep-onset detection for wearable power naps.
//!
//! This library fuses two noisy signals, heart-rate variability and body
//! motion, into a debounced sleep/awake decision and drives a nap countdown
//! that ends with a wake signal.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                            napwatch                               │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐                                │
//! │  │MotionSource │──▶│   Motion    │──┐                             │
//! │  │ (accel 1Hz) │   │  Processor  │  │   ┌─────────────┐           │
//! │  └─────────────┘   └─────────────┘  ├──▶│ NapPipeline │──▶ view   │
//! │  ┌─────────────┐   ┌─────────────┐  │   │ state mach. │──▶ events │
//! │  │ Biometric   │──▶│    HRV      │──┘   │ countdown   │──▶ wake   │
//! │  │   Source    │   │  Processor  │      └─────────────┘           │
//! │  └─────────────┘   └─────────────┘                                │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use napwatch::sources::{RecordingWakeSignal, ScriptedBiometricSource, SimulatedMotionSource, StillnessProfile};
//! use napwatch::{Collaborators, Config, Monitor};
//!
//! # async fn run() -> Result<(), napwatch::EngineError> {
//! let monitor = Monitor::new(
//!     Config::default(),
//!     Collaborators {
//!         biometric: Arc::new(ScriptedBiometricSource::new()),
//!         motion: Arc::new(SimulatedMotionSource::new(StillnessProfile::Still)),
//!         wake: Arc::new(RecordingWakeSignal::new()),
//!     },
//! );
//!
//! monitor.start().await?;
//! println!("state: {}", monitor.current_sleep_state());
//! let summary = monitor.stop().await?;
//! println!("transitions: {}", summary.transitions.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod session;
pub mod sources;

// Re-export key types at crate root for convenience
pub use config::Config;
pub use core::{
    ConditionSnapshot, EngineEvent, EngineView, HrvProcessor, MotionProcessor, MotionWindow,
    ReadingsSnapshot, SleepState, SleepStateMachine, StopReason,
};
pub use error::{ConfigError, EngineError, SourceError};
pub use session::{Collaborators, Monitor, NapPipeline, SessionStats, SessionSummary};
pub use sources::{BiometricSource, MotionSource, WakeSignal};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
