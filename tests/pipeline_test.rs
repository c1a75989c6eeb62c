//! Integration tests for offline nap detection through the processors and pipeline

use chrono::{DateTime, Duration, Utc};
use napwatch::config::Config;
use napwatch::core::{BaselineUpdate, MotionProcessor, SleepState};
use napwatch::session::{replay, NapPipeline, ReplayInput, ReplayLog};
use napwatch::sources::{AccelerationSample, HrvReading, MotionSample};
use napwatch::StopReason;
use pretty_assertions::assert_eq;

fn t(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn baseline(value: f64) -> BaselineUpdate {
    BaselineUpdate {
        computed_at: t(0),
        all_day: Some(value),
        all_day_count: 100,
        daytime: Some(value),
        daytime_count: 70,
    }
}

/// Feed one magnitude sample per second and tick once per second.
struct Rig {
    motion: MotionProcessor,
    pipeline: NapPipeline,
    path: Vec<(i64, SleepState)>,
}

impl Rig {
    fn new(config: &Config) -> Self {
        Self {
            motion: MotionProcessor::new(config.motion.clone()),
            pipeline: NapPipeline::new(config, t(0)),
            path: Vec::new(),
        }
    }

    fn second(&mut self, s: i64, magnitude: f64) {
        let report = self.motion.ingest(MotionSample::new(t(s), magnitude));
        self.pipeline.apply_motion_report(report);
        let outcome = self.pipeline.tick(t(s));
        if let Some(transition) = outcome.transition {
            self.path.push((s, transition.to));
        }
    }
}

#[test]
fn test_still_wearer_with_elevated_hrv_falls_asleep() {
    let config = Config::default();
    let mut rig = Rig::new(&config);
    rig.pipeline.apply_baseline(baseline(50.0));
    rig.pipeline.ingest_hrv(HrvReading::new(t(0), 60.0));

    for s in 0..400 {
        rig.second(s, 0.01);
    }

    // Still from the first sample, confirmed 180 s later.
    assert_eq!(
        rig.path,
        vec![(0, SleepState::PotentialSleep), (180, SleepState::Asleep)]
    );
    assert_eq!(rig.pipeline.machine().sleep_start_time(), Some(t(0)));
    assert_eq!(rig.pipeline.countdown().deadline(), t(1_200));
}

#[test]
fn test_hrv_below_threshold_never_sleeps() {
    let config = Config::default();
    let mut rig = Rig::new(&config);
    rig.pipeline.apply_baseline(baseline(50.0));
    rig.pipeline.ingest_hrv(HrvReading::new(t(0), 55.0));

    for s in 0..600 {
        rig.second(s, 0.01);
    }
    assert!(rig.path.is_empty());
    assert_eq!(rig.pipeline.state(), SleepState::Awake);
    assert!(rig.pipeline.condition_snapshot().motion);
    assert!(!rig.pipeline.condition_snapshot().hrv);
}

#[test]
fn test_fallback_baseline_applies_when_history_is_empty() {
    let config = Config::default();
    let mut rig = Rig::new(&config);
    rig.pipeline.apply_baseline(BaselineUpdate {
        computed_at: t(0),
        all_day: None,
        all_day_count: 0,
        daytime: None,
        daytime_count: 0,
    });
    rig.pipeline.ingest_hrv(HrvReading::new(t(0), 58.0));

    for s in 0..250 {
        rig.second(s, 0.01);
    }
    assert_eq!(rig.pipeline.hrv().baseline_value(), Some(50.0));
    assert!(rig.pipeline.hrv().active_baseline().is_fallback);
    assert_eq!(rig.pipeline.state(), SleepState::Asleep);
}

#[test]
fn test_movement_burst_disturbs_then_recovers() {
    let config = Config::default();
    let mut rig = Rig::new(&config);
    rig.pipeline.apply_baseline(baseline(50.0));
    rig.pipeline.ingest_hrv(HrvReading::new(t(0), 65.0));

    for s in 0..300 {
        rig.second(s, 0.005);
    }
    assert_eq!(rig.pipeline.state(), SleepState::Asleep);

    // Large movements lift the long-window mean above the threshold, even
    // after auto-adjustment pushes the threshold to its ceiling.
    let mut s = 300;
    while rig.pipeline.state() == SleepState::Asleep {
        rig.second(s, 1.0);
        s += 1;
        assert!(s < 400, "movement never disturbed sleep");
    }
    assert_eq!(rig.pipeline.state(), SleepState::Disturbed);

    // The burst leaves the long window only after it has been pushed out;
    // with large spikes that takes longer than the disturbed timeout.
    for _ in 0..400 {
        rig.second(s, 0.005);
        s += 1;
    }
    let states: Vec<SleepState> = rig.path.iter().map(|(_, state)| *state).collect();
    assert_eq!(
        &states[..4],
        &[
            SleepState::PotentialSleep,
            SleepState::Asleep,
            SleepState::Disturbed,
            SleepState::Awake,
        ]
    );
    assert_eq!(
        rig.pipeline.machine().sleep_detected(),
        rig.pipeline.state() == SleepState::Asleep
    );
}

#[test]
fn test_acceleration_vectors_remove_gravity() {
    let config = Config::default();
    let mut motion = MotionProcessor::new(config.motion.clone());
    let mut report = None;
    for s in 0..30 {
        report = Some(motion.ingest_acceleration(&AccelerationSample::new(t(s), 0.0, 0.0, 1.005)));
    }
    let report = report.unwrap();
    assert!(report.is_still);
    assert!((report.motion_level - 0.005).abs() < 1e-9);
}

#[test]
fn test_replay_log_through_wake() {
    let mut config = Config::default();
    config.session.nap_duration = std::time::Duration::from_secs(600);

    let mut inputs = vec![
        ReplayInput::Baseline {
            timestamp: t(0),
            all_day: Some(52.0),
            daytime: Some(50.0),
        },
        ReplayInput::Hrv {
            timestamp: t(0),
            value_ms: 61.0,
        },
    ];
    for s in 0..2_000 {
        inputs.push(ReplayInput::Acceleration {
            timestamp: t(s),
            x: 0.0,
            y: 0.002,
            z: 1.0,
        });
    }

    let outcome = replay(
        &config,
        &ReplayLog {
            start: Some(t(0)),
            inputs,
        },
    )
    .unwrap();

    let summary = &outcome.summary;
    assert_eq!(summary.sleep_onset, Some(t(0)));
    assert_eq!(summary.wake_triggered_at, Some(t(600)));
    assert_eq!(summary.stop_reason, Some(StopReason::WakeCompleted));
    assert_eq!(outcome.ticks, 601);

    let kinds: Vec<&str> = outcome
        .events
        .iter()
        .map(|(_, event)| event.kind())
        .filter(|kind| *kind != "readings_changed")
        .collect();
    assert_eq!(
        kinds,
        vec![
            "session_started",
            "conditions_changed",
            "state_changed",
            "state_changed",
            "countdown_rebased",
            "wake_triggered",
            "session_stopped",
        ]
    );
}

#[test]
fn test_stale_hrv_expiry_is_opt_in() {
    let mut config = Config::default();
    config.hrv.max_reading_age = Some(std::time::Duration::from_secs(900));

    let mut rig = Rig::new(&config);
    rig.pipeline.apply_baseline(baseline(50.0));
    rig.pipeline.ingest_hrv(HrvReading::new(t(0), 60.0));

    for s in 0..=900 {
        rig.second(s, 0.01);
    }
    assert_eq!(rig.pipeline.state(), SleepState::Asleep);

    rig.second(901, 0.01);
    assert_eq!(rig.pipeline.readings_snapshot().hrv, None);
    assert_eq!(rig.pipeline.state(), SleepState::Disturbed);

    let since = Duration::seconds(901);
    assert_eq!(rig.pipeline.machine().last_transition_time(), t(0) + since);
}
