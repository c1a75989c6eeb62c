//! Debounced sleep/awake state machine.
//!
//! ```text
//!            combined              held >= confirmation
//!   Awake ───────────────▶ PotentialSleep ───────────────▶ Asleep
//!     ▲  ◀───────────────        │                         │   ▲
//!     │      !combined           │                !combined│   │combined
//!     │                                                    ▼   │
//!     └──────────────────────────────────────────────── Disturbed
//!            !combined for > disturbed_timeout
//! ```
//!
//! The machine is evaluated once per tick against a fresh
//! [`ConditionState`]. Guards within a state are mutually exclusive, so at
//! most one edge fires per tick. Staying in a state never touches
//! `last_transition_time`.

use crate::config::{chrono_duration, StateMachineConfig};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Inferred sleep state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepState {
    #[default]
    Awake,
    /// Both conditions hold but not yet for the confirmation window
    PotentialSleep,
    /// Sleep onset confirmed
    Asleep,
    /// Conditions lapsed after onset; may return to Asleep
    Disturbed,
}

impl SleepState {
    /// Stable snake_case name.
    pub fn label(&self) -> &'static str {
        match self {
            SleepState::Awake => "awake",
            SleepState::PotentialSleep => "potential_sleep",
            SleepState::Asleep => "asleep",
            SleepState::Disturbed => "disturbed",
        }
    }
}

impl std::fmt::Display for SleepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Current values of the two sub-conditions and their conjunction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConditionState {
    pub hrv_met: bool,
    pub motion_met: bool,
    pub combined_met: bool,
    /// Set on the false→true edge of `combined_met`, cleared on true→false
    pub combined_since: Option<DateTime<Utc>>,
}

impl ConditionState {
    /// Recompute the conjunction. Returns whether any field changed.
    pub fn update(&mut self, hrv_met: bool, motion_met: bool, now: DateTime<Utc>) -> bool {
        let previous = *self;
        let combined = hrv_met && motion_met;

        match (self.combined_met, combined) {
            (false, true) => self.combined_since = Some(now),
            (true, false) => self.combined_since = None,
            _ => {}
        }

        self.hrv_met = hrv_met;
        self.motion_met = motion_met;
        self.combined_met = combined;
        *self != previous
    }

    /// How long `combined_met` has held continuously.
    pub fn held_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.combined_since.map(|since| now - since)
    }

    /// Reset every condition to false.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// An accepted state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: SleepState,
    pub to: SleepState,
    pub at: DateTime<Utc>,
    /// Confirmed sleep onset after the transition
    pub sleep_start_time: Option<DateTime<Utc>>,
}

/// Sleep state machine for one session.
#[derive(Debug, Clone)]
pub struct SleepStateMachine {
    confirmation_window: Duration,
    disturbed_timeout: Duration,
    state: SleepState,
    last_transition_time: DateTime<Utc>,
    time_in_state: Duration,
    sleep_start_time: Option<DateTime<Utc>>,
    sleep_detected: bool,
    halted: bool,
}

impl SleepStateMachine {
    /// Create a machine in Awake.
    pub fn new(config: &StateMachineConfig, now: DateTime<Utc>) -> Self {
        Self {
            confirmation_window: chrono_duration(config.confirmation_window),
            disturbed_timeout: chrono_duration(config.disturbed_timeout),
            state: SleepState::Awake,
            last_transition_time: now,
            time_in_state: Duration::zero(),
            sleep_start_time: None,
            sleep_detected: false,
            halted: false,
        }
    }

    /// Return to Awake and accept evaluations again.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.force_awake(now);
        self.halted = false;
    }

    /// Freeze at Awake. Evaluations are ignored until the next [`reset`](Self::reset).
    pub fn halt(&mut self, now: DateTime<Utc>) {
        self.force_awake(now);
        self.halted = true;
    }

    /// Evaluate the guards of the current state.
    pub fn evaluate(&mut self, conditions: &ConditionState, now: DateTime<Utc>) -> Option<Transition> {
        if self.halted {
            return None;
        }
        self.time_in_state = now - self.last_transition_time;

        let combined = conditions.combined_met;
        let next = match self.state {
            SleepState::Awake => combined.then_some(SleepState::PotentialSleep),
            SleepState::PotentialSleep => {
                if !combined {
                    Some(SleepState::Awake)
                } else if conditions
                    .held_for(now)
                    .is_some_and(|held| held >= self.confirmation_window)
                {
                    Some(SleepState::Asleep)
                } else {
                    None
                }
            }
            SleepState::Asleep => (!combined).then_some(SleepState::Disturbed),
            SleepState::Disturbed => {
                if combined {
                    Some(SleepState::Asleep)
                } else if self.time_in_state > self.disturbed_timeout {
                    Some(SleepState::Awake)
                } else {
                    None
                }
            }
        }?;

        let from = self.state;
        match (from, next) {
            (SleepState::PotentialSleep, SleepState::Asleep) => {
                self.sleep_start_time = conditions.combined_since;
                self.sleep_detected = true;
            }
            (SleepState::Disturbed, SleepState::Awake) => {
                self.sleep_start_time = None;
                self.sleep_detected = false;
            }
            _ => {}
        }

        self.state = next;
        self.last_transition_time = now;
        self.time_in_state = Duration::zero();

        Some(Transition {
            from,
            to: next,
            at: now,
            sleep_start_time: self.sleep_start_time,
        })
    }

    /// Current state.
    pub fn state(&self) -> SleepState {
        self.state
    }

    /// When the last transition happened.
    pub fn last_transition_time(&self) -> DateTime<Utc> {
        self.last_transition_time
    }

    /// Time in the current state as of the last evaluation.
    pub fn time_in_state(&self) -> Duration {
        self.time_in_state
    }

    /// Onset of the current sleep episode, held through Disturbed.
    pub fn sleep_start_time(&self) -> Option<DateTime<Utc>> {
        self.sleep_start_time
    }

    /// Whether sleep has been confirmed and not yet lost.
    pub fn sleep_detected(&self) -> bool {
        self.sleep_detected
    }

    /// Whether the session stop froze the machine.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    fn force_awake(&mut self, now: DateTime<Utc>) {
        self.state = SleepState::Awake;
        self.last_transition_time = now;
        self.time_in_state = Duration::zero();
        self.sleep_start_time = None;
        self.sleep_detected = false;
    }
}
