//! Offline replay of recorded sensor logs through [`NapPipeline`].
//!
//! A log is a JSON document:
//!
//! ```json
//! {
//!   "start": "2024-03-10T13:00:00Z",
//!   "inputs": [
//!     { "type": "baseline", "timestamp": "...", "all_day": 50.0, "daytime": 48.0 },
//!     { "type": "acceleration", "timestamp": "...", "x": 0.0, "y": 0.0, "z": 1.0 },
//!     { "type": "motion", "timestamp": "...", "magnitude": 0.01 },
//!     { "type": "hrv", "timestamp": "...", "value_ms": 61.0 }
//!   ]
//! }
//! ```
//!
//! The pipeline ticks at the configured interval from `start` (or the first
//! input) until the log is exhausted or the wake fires. Inputs stamped at
//! or before a tick are applied before that tick is evaluated.

use crate::config::{chrono_duration, Config};
use crate::core::hrv::BaselineUpdate;
use crate::core::motion::MotionProcessor;
use crate::core::snapshot::{EngineEvent, StopReason};
use crate::error::ConfigError;
use crate::session::pipeline::NapPipeline;
use crate::session::stats::SessionSummary;
use crate::sources::types::{AccelerationSample, HrvReading, MotionSample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One recorded input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayInput {
    Acceleration {
        timestamp: DateTime<Utc>,
        x: f64,
        y: f64,
        z: f64,
    },
    /// Gravity-removed magnitude
    Motion {
        timestamp: DateTime<Utc>,
        magnitude: f64,
    },
    Hrv {
        timestamp: DateTime<Utc>,
        value_ms: f64,
    },
    /// A finished baseline query; a missing value means "no samples"
    Baseline {
        timestamp: DateTime<Utc>,
        #[serde(default)]
        all_day: Option<f64>,
        #[serde(default)]
        daytime: Option<f64>,
    },
}

impl ReplayInput {
    /// When the input was recorded.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ReplayInput::Acceleration { timestamp, .. }
            | ReplayInput::Motion { timestamp, .. }
            | ReplayInput::Hrv { timestamp, .. }
            | ReplayInput::Baseline { timestamp, .. } => *timestamp,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayLog {
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    pub inputs: Vec<ReplayInput>,
}

impl ReplayLog {
    /// Parse a log from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Result of a replay run.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub summary: SessionSummary,
    /// Every event in emission order, stamped with its tick time
    pub events: Vec<(DateTime<Utc>, EngineEvent)>,
    pub ticks: u64,
}

/// Drive `log` through a fresh pipeline.
///
/// Fails before ticking when `config` does not validate.
pub fn replay(config: &Config, log: &ReplayLog) -> Result<ReplayOutcome, ConfigError> {
    config.validate()?;

    let mut inputs = log.inputs.clone();
    inputs.sort_by_key(|input| input.timestamp());

    let start = log
        .start
        .or_else(|| inputs.first().map(|input| input.timestamp()))
        .unwrap_or_else(Utc::now);
    let end = inputs.last().map(|input| input.timestamp()).unwrap_or(start);
    let step = chrono_duration(config.state_machine.tick_interval);

    let session_id = Uuid::new_v4();
    let mut summary = SessionSummary::new(session_id, start);
    let mut events = vec![(start, EngineEvent::SessionStarted { session_id, at: start })];
    let mut pipeline = NapPipeline::new(config, start);
    let mut motion = MotionProcessor::new(config.motion.clone());
    let mut pending = inputs.into_iter().peekable();
    let mut ticks = 0;
    let mut now = start;

    let reason = loop {
        while let Some(input) = pending.next_if(|input| input.timestamp() <= now) {
            apply(&mut pipeline, &mut motion, input);
        }

        let outcome = pipeline.tick(now);
        ticks += 1;
        if let Some(transition) = outcome.transition {
            summary.record_transition(transition);
        }
        events.extend(outcome.events.into_iter().map(|event| (now, event)));

        if let Some(wake) = outcome.wake {
            summary.wake_triggered_at = Some(wake.at);
            break StopReason::WakeCompleted;
        }
        if now >= end && pending.peek().is_none() {
            break StopReason::Requested;
        }
        now += step;
    };

    pipeline.stop(now);
    summary.finish(now, reason);
    events.push((now, EngineEvent::SessionStopped { at: now, reason }));

    Ok(ReplayOutcome {
        summary,
        events,
        ticks,
    })
}

fn apply(pipeline: &mut NapPipeline, motion: &mut MotionProcessor, input: ReplayInput) {
    match input {
        ReplayInput::Acceleration { timestamp, x, y, z } => {
            let report = motion.ingest_acceleration(&AccelerationSample::new(timestamp, x, y, z));
            pipeline.apply_motion_report(report);
        }
        ReplayInput::Motion {
            timestamp,
            magnitude,
        } => {
            let report = motion.ingest(MotionSample::new(timestamp, magnitude));
            pipeline.apply_motion_report(report);
        }
        ReplayInput::Hrv {
            timestamp,
            value_ms,
        } => {
            pipeline.ingest_hrv(HrvReading::new(timestamp, value_ms));
        }
        ReplayInput::Baseline {
            timestamp,
            all_day,
            daytime,
        } => pipeline.apply_baseline(BaselineUpdate {
            computed_at: timestamp,
            all_day,
            all_day_count: usize::from(all_day.is_some()),
            daytime,
            daytime_count: usize::from(daytime.is_some()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state_machine::SleepState;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_parse_tagged_inputs() {
        let json = r#"{
            "inputs": [
                { "type": "hrv", "timestamp": "2024-03-10T13:00:00Z", "value_ms": 61.0 },
                { "type": "baseline", "timestamp": "2024-03-10T13:00:00Z", "daytime": 48.0 },
                { "type": "motion", "timestamp": "2024-03-10T13:00:01Z", "magnitude": 0.01 }
            ]
        }"#;
        let log = ReplayLog::from_json(json).unwrap();
        assert_eq!(log.start, None);
        assert_eq!(log.inputs.len(), 3);
        assert!(matches!(
            log.inputs[1],
            ReplayInput::Baseline { all_day: None, daytime: Some(d), .. } if d == 48.0
        ));
    }

    #[test]
    fn test_empty_log_stops_immediately() {
        let log = ReplayLog {
            start: Some(t(0)),
            inputs: Vec::new(),
        };
        let outcome = replay(&Config::default(), &log).unwrap();
        assert_eq!(outcome.ticks, 1);
        assert_eq!(outcome.summary.stop_reason, Some(StopReason::Requested));
        assert!(outcome.summary.transitions.is_empty());
    }

    #[test]
    fn test_inputs_apply_before_their_tick() {
        let mut inputs = vec![
            ReplayInput::Baseline {
                timestamp: t(0),
                all_day: Some(50.0),
                daytime: Some(50.0),
            },
            ReplayInput::Hrv {
                timestamp: t(0),
                value_ms: 60.0,
            },
        ];
        for s in 0..=10 {
            inputs.push(ReplayInput::Motion {
                timestamp: t(s),
                magnitude: 0.01,
            });
        }
        let log = ReplayLog {
            start: Some(t(0)),
            inputs,
        };

        let outcome = replay(&Config::default(), &log).unwrap();
        assert_eq!(outcome.ticks, 11);
        assert_eq!(outcome.summary.transitions.len(), 1);
        assert_eq!(outcome.summary.transitions[0].to, SleepState::PotentialSleep);
        assert_eq!(outcome.summary.transitions[0].at, t(0));
    }

    #[test]
    fn test_zero_tick_interval_is_rejected() {
        let mut config = Config::default();
        config.state_machine.tick_interval = std::time::Duration::ZERO;
        let log = ReplayLog {
            start: Some(t(0)),
            inputs: vec![ReplayInput::Hrv {
                timestamp: t(5),
                value_ms: 60.0,
            }],
        };

        let result = replay(&config, &log);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                field: "state_machine.tick_interval",
                ..
            })
        ));
    }
}
