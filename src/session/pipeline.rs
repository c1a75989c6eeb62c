//! Tick-level fusion of the processors, state machine and countdown.
//!
//! `NapPipeline` is the only place a [`SleepState`] changes. It never reads
//! the clock; every operation takes `now`, so the runtime tick and offline
//! replay drive exactly the same logic.

use crate::config::{chrono_duration, Config, SessionConfig};
use crate::core::hrv::{BaselineUpdate, HrvProcessor};
use crate::core::motion::MotionReport;
use crate::core::snapshot::{ConditionSnapshot, EngineEvent, EngineView, ReadingsSnapshot};
use crate::core::state_machine::{ConditionState, SleepState, SleepStateMachine, Transition};
use crate::session::countdown::NapCountdown;
use crate::sources::types::HrvReading;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

/// Wake request produced when the countdown expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeRequest {
    pub at: DateTime<Utc>,
    pub strength: u8,
    pub with_sound: bool,
}

/// Everything one tick produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    pub events: Vec<EngineEvent>,
    pub transition: Option<Transition>,
    pub wake: Option<WakeRequest>,
}

/// Per-session fusion state.
#[derive(Debug, Clone)]
pub struct NapPipeline {
    session: SessionConfig,
    min_stillness: Duration,
    hrv: HrvProcessor,
    machine: SleepStateMachine,
    conditions: ConditionState,
    countdown: NapCountdown,
    motion: Option<MotionReport>,
    motion_available: bool,
    last_conditions: ConditionSnapshot,
    last_readings: ReadingsSnapshot,
    wake_fired: bool,
    stopped: bool,
}

impl NapPipeline {
    /// Start a fresh session at `now`: Awake, empty conditions, countdown from `now`.
    pub fn new(config: &Config, now: DateTime<Utc>) -> Self {
        Self {
            session: config.session.clone(),
            min_stillness: chrono_duration(config.motion.min_stillness),
            hrv: HrvProcessor::new(config.hrv.clone()),
            machine: SleepStateMachine::new(&config.state_machine, now),
            conditions: ConditionState::default(),
            countdown: NapCountdown::new(config.session.nap_duration, now),
            motion: None,
            motion_available: true,
            last_conditions: ConditionSnapshot::default(),
            last_readings: ReadingsSnapshot::default(),
            wake_fired: false,
            stopped: false,
        }
    }

    /// Latest published motion report.
    pub fn apply_motion_report(&mut self, report: MotionReport) {
        if self.motion_available && !self.stopped {
            self.motion = Some(report);
        }
    }

    /// Motion hardware is absent or the subscription failed. The motion
    /// condition stays false for the rest of the session.
    pub fn mark_motion_unavailable(&mut self) {
        if self.motion_available {
            warn!("motion unavailable, motion condition disabled for this session");
        }
        self.motion_available = false;
        self.motion = None;
    }

    /// Returns whether the current HRV reading changed.
    pub fn ingest_hrv(&mut self, reading: HrvReading) -> bool {
        !self.stopped && self.hrv.ingest(reading)
    }

    /// Apply a finished baseline computation.
    pub fn apply_baseline(&mut self, update: BaselineUpdate) {
        if !self.stopped {
            self.hrv.apply_baseline(update);
        }
    }

    /// Evaluate one tick.
    ///
    /// Order: sub-conditions, conjunction, state machine, countdown rebase,
    /// readings, countdown expiry.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if self.stopped {
            return outcome;
        }

        self.hrv.expire_stale(now);
        let hrv_met = self.hrv.condition_met();
        let motion_met = self.motion_available
            && self
                .motion
                .is_some_and(|report| report.still_for(self.min_stillness, now));
        self.conditions.update(hrv_met, motion_met, now);

        let conditions = self.condition_snapshot();
        if conditions != self.last_conditions {
            self.last_conditions = conditions;
            outcome.events.push(EngineEvent::ConditionsChanged(conditions));
        }

        if let Some(transition) = self.machine.evaluate(&self.conditions, now) {
            info!(
                from = %transition.from,
                to = %transition.to,
                sleep_start = ?transition.sleep_start_time,
                "sleep state transition"
            );
            outcome.events.push(EngineEvent::StateChanged(transition));
            if let Some(reference) = self.countdown.on_transition(&transition) {
                info!(deadline = %self.countdown.deadline(), "countdown rebased to sleep onset");
                outcome.events.push(EngineEvent::CountdownRebased {
                    reference,
                    deadline: self.countdown.deadline(),
                });
            }
            outcome.transition = Some(transition);
        }

        let readings = self.readings_at(now);
        if readings != self.last_readings {
            self.last_readings = readings;
            outcome.events.push(EngineEvent::ReadingsChanged(readings));
        }

        if !self.wake_fired && self.countdown.is_expired(now) {
            self.wake_fired = true;
            let wake = WakeRequest {
                at: now,
                strength: self.session.wake_strength,
                with_sound: self.session.wake_with_sound,
            };
            outcome.events.push(EngineEvent::WakeTriggered {
                at: wake.at,
                strength: wake.strength,
                with_sound: wake.with_sound,
            });
            outcome.wake = Some(wake);
        }

        outcome
    }

    /// Freeze at Awake and drop per-session signal state. Later calls are no-ops.
    pub fn stop(&mut self, now: DateTime<Utc>) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.machine.halt(now);
        self.conditions.clear();
        self.hrv.clear();
        self.motion = None;
        self.last_conditions = ConditionSnapshot::default();
        self.last_readings = ReadingsSnapshot::default();
    }

    /// Current sleep state.
    pub fn state(&self) -> SleepState {
        self.machine.state()
    }

    /// Condition tracking, including when the conjunction began.
    pub fn conditions(&self) -> &ConditionState {
        &self.conditions
    }

    /// Conditions as of the last tick.
    pub fn condition_snapshot(&self) -> ConditionSnapshot {
        ConditionSnapshot {
            hrv: self.conditions.hrv_met,
            motion: self.conditions.motion_met,
            combined: self.conditions.combined_met,
        }
    }

    /// Readings as of the last tick.
    pub fn readings_snapshot(&self) -> ReadingsSnapshot {
        self.last_readings
    }

    /// Get the state machine.
    pub fn machine(&self) -> &SleepStateMachine {
        &self.machine
    }

    /// Get the HRV processor.
    pub fn hrv(&self) -> &HrvProcessor {
        &self.hrv
    }

    /// Get the nap countdown.
    pub fn countdown(&self) -> &NapCountdown {
        &self.countdown
    }

    /// Whether an accelerometer is feeding the pipeline.
    pub fn motion_available(&self) -> bool {
        self.motion_available
    }

    /// Whether the wake request has been issued.
    pub fn wake_fired(&self) -> bool {
        self.wake_fired
    }

    /// Whether `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Snapshot of everything the UI reads.
    pub fn view(&self) -> EngineView {
        EngineView {
            state: self.machine.state(),
            conditions: self.condition_snapshot(),
            readings: self.last_readings,
            sleep_start_time: self.machine.sleep_start_time(),
            wake_deadline: (!self.stopped).then(|| self.countdown.deadline()),
        }
    }

    fn readings_at(&self, now: DateTime<Utc>) -> ReadingsSnapshot {
        let (motion_level, is_still, still_duration_secs) = match self.motion {
            Some(report) => {
                let still_for = report
                    .stillness
                    .map(|interval| (now - interval.start).max(Duration::zero()))
                    .unwrap_or_else(Duration::zero);
                (
                    report.motion_level,
                    report.is_still,
                    still_for.num_milliseconds() as f64 / 1000.0,
                )
            }
            None => (0.0, false, 0.0),
        };
        ReadingsSnapshot {
            hrv: self.hrv.current_value(),
            baseline_hrv: self.hrv.baseline_value(),
            motion_level,
            is_still,
            still_duration_secs,
        }
    }
}
