//! Core signal processing for napwatch.
//!
//! This module contains:
//! - The bounded motion window and the motion (stillness) processor
//! - The HRV processor with rolling baselines
//! - The debounced sleep state machine
//! - Snapshot and event types exposed to the session layer

pub mod hrv;
pub mod motion;
pub mod snapshot;
pub mod state_machine;
pub mod windowing;

// Re-export commonly used types
pub use hrv::{hrv_condition_met, Baseline, BaselineUpdate, HrvProcessor, FALLBACK_BASELINE_MS};
pub use motion::{MotionProcessor, MotionReport, StillnessInterval};
pub use snapshot::{ConditionSnapshot, EngineEvent, EngineView, ReadingsSnapshot, StopReason};
pub use state_machine::{ConditionState, SleepState, SleepStateMachine, Transition};
pub use windowing::MotionWindow;
