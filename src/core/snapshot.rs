//! Values exposed to the session/UI layer, and the change events that carry them.
//!
//! Missing measurements are `None` (serialized as `null`); the UI decides
//! how to render "waiting for data".

use crate::core::state_machine::{SleepState, Transition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The three condition booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConditionSnapshot {
    pub hrv: bool,
    pub motion: bool,
    pub combined: bool,
}

/// Current sensor-derived readings.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReadingsSnapshot {
    /// Latest HRV in ms
    pub hrv: Option<f64>,
    /// Active baseline in ms
    pub baseline_hrv: Option<f64>,
    /// Short-window motion level in g
    pub motion_level: f64,
    pub is_still: bool,
    /// Seconds of continuous stillness
    pub still_duration_secs: f64,
}

/// Everything a UI needs to render one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineView {
    pub state: SleepState,
    pub conditions: ConditionSnapshot,
    pub readings: ReadingsSnapshot,
    pub sleep_start_time: Option<DateTime<Utc>>,
    /// When the countdown will fire, while a session runs
    pub wake_deadline: Option<DateTime<Utc>>,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `stop` was called
    Requested,
    /// The countdown expired and the wake signal fired
    WakeCompleted,
    /// A new session was started on the same monitor
    Replaced,
}

/// Change notifications, emitted at tick granularity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    SessionStarted {
        session_id: Uuid,
        at: DateTime<Utc>,
    },
    StateChanged(Transition),
    ConditionsChanged(ConditionSnapshot),
    ReadingsChanged(ReadingsSnapshot),
    /// The countdown reference moved to confirmed sleep onset
    CountdownRebased {
        reference: DateTime<Utc>,
        deadline: DateTime<Utc>,
    },
    WakeTriggered {
        at: DateTime<Utc>,
        strength: u8,
        with_sound: bool,
    },
    SessionStopped {
        at: DateTime<Utc>,
        reason: StopReason,
    },
}

impl EngineEvent {
    /// Short label for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::SessionStarted { .. } => "session_started",
            EngineEvent::StateChanged(_) => "state_changed",
            EngineEvent::ConditionsChanged(_) => "conditions_changed",
            EngineEvent::ReadingsChanged(_) => "readings_changed",
            EngineEvent::CountdownRebased { .. } => "countdown_rebased",
            EngineEvent::WakeTriggered { .. } => "wake_triggered",
            EngineEvent::SessionStopped { .. } => "session_stopped",
        }
    }
}
