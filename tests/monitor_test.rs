//! Integration tests for the live monitor against simulated sources

use chrono::Utc;
use crossbeam_channel::Receiver;
use napwatch::config::Config;
use napwatch::core::{EngineEvent, SleepState, StopReason};
use napwatch::session::{Collaborators, Monitor};
use napwatch::sources::{
    HrvReading, RecordingWakeSignal, ScriptedBiometricSource, SimulatedMotionSource,
    StillnessProfile,
};
use napwatch::EngineError;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Second-scale cadences compressed to milliseconds.
fn fast_config() -> Config {
    let mut config = Config::default();
    config.motion.sample_interval = Duration::from_millis(10);
    config.motion.publish_interval = Duration::from_millis(20);
    config.state_machine.tick_interval = Duration::from_millis(50);
    config.state_machine.confirmation_window = Duration::from_millis(500);
    config.state_machine.disturbed_timeout = Duration::from_millis(500);
    config.session.nap_duration = Duration::from_secs(2);
    config
}

struct Fixture {
    biometric: Arc<ScriptedBiometricSource>,
    motion: Arc<SimulatedMotionSource>,
    wake: Arc<RecordingWakeSignal>,
}

impl Fixture {
    fn relaxed(profile: StillnessProfile) -> Self {
        let now = Utc::now();
        let biometric = Arc::new(ScriptedBiometricSource::with_steady_history(
            now,
            7,
            chrono::Duration::hours(1),
            50.0,
        ));
        biometric.push_reading(HrvReading::new(now, 62.0));
        Self {
            biometric,
            motion: Arc::new(SimulatedMotionSource::new(profile)),
            wake: Arc::new(RecordingWakeSignal::new()),
        }
    }

    fn with_motion(mut self, motion: SimulatedMotionSource) -> Self {
        self.motion = Arc::new(motion);
        self
    }

    fn monitor(&self, config: Config) -> Monitor {
        Monitor::new(
            config,
            Collaborators {
                biometric: self.biometric.clone(),
                motion: self.motion.clone(),
                wake: self.wake.clone(),
            },
        )
    }
}

/// Collect events until one matches or the timeout passes.
async fn wait_for(
    events: &Receiver<EngineEvent>,
    timeout: Duration,
    found: impl Fn(&EngineEvent) -> bool,
) -> (Vec<EngineEvent>, bool) {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        for event in events.try_iter() {
            let hit = found(&event);
            seen.push(event);
            if hit {
                return (seen, true);
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    (seen, false)
}

fn is_stop(event: &EngineEvent, expected: StopReason) -> bool {
    matches!(event, EngineEvent::SessionStopped { reason, .. } if *reason == expected)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_nap_ends_with_wake() {
    let fixture = Fixture::relaxed(StillnessProfile::Still);
    let monitor = fixture.monitor(fast_config());
    let events = monitor.events();

    monitor.start().await.unwrap();
    assert!(fixture.biometric.background_delivery_enabled());

    let (seen, stopped) = wait_for(&events, Duration::from_secs(15), |e| {
        is_stop(e, StopReason::WakeCompleted)
    })
    .await;
    assert!(stopped, "session never completed: {seen:?}");

    let reached_asleep = seen.iter().any(|e| {
        matches!(e, EngineEvent::StateChanged(t) if t.to == SleepState::Asleep)
    });
    assert!(reached_asleep);
    assert!(seen
        .iter()
        .any(|e| matches!(e, EngineEvent::CountdownRebased { .. })));
    assert!(matches!(seen[0], EngineEvent::SessionStarted { .. }));

    assert_eq!(fixture.wake.trigger_count(), 1);
    let record = fixture.wake.triggers()[0];
    assert_eq!(record.strength, 3);
    assert!(record.with_sound);

    assert!(!monitor.is_running().await);
    assert_eq!(monitor.current_sleep_state(), SleepState::Awake);
    assert!(!fixture.motion.is_streaming());
    assert!(!fixture.biometric.background_delivery_enabled());

    let summary = monitor.stop().await.unwrap();
    assert_eq!(summary.stop_reason, Some(StopReason::WakeCompleted));
    assert!(summary.sleep_onset.is_some());
    assert!(summary.wake_triggered_at.is_some());

    let stats = monitor.stats().snapshot();
    assert!(stats.motion_samples > 0);
    assert!(stats.ticks > 0);
    assert!(stats.baseline_refreshes >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_freezes_at_awake() {
    let fixture = Fixture::relaxed(StillnessProfile::Still);
    let mut config = fast_config();
    config.session.nap_duration = Duration::from_secs(600);
    let monitor = fixture.monitor(config);
    let events = monitor.events();

    monitor.start().await.unwrap();
    let (_, asleep) = wait_for(&events, Duration::from_secs(10), |e| {
        matches!(e, EngineEvent::StateChanged(t) if t.to == SleepState::Asleep)
    })
    .await;
    assert!(asleep);
    assert_eq!(monitor.current_sleep_state(), SleepState::Asleep);

    let summary = monitor.stop().await.unwrap();
    assert_eq!(summary.stop_reason, Some(StopReason::Requested));
    assert_eq!(monitor.current_sleep_state(), SleepState::Awake);
    assert_eq!(monitor.view().sleep_start_time, None);
    assert!(!fixture.motion.is_streaming());

    let drained: Vec<EngineEvent> = events.try_iter().collect();
    assert!(matches!(
        drained.last(),
        Some(EngineEvent::SessionStopped {
            reason: StopReason::Requested,
            ..
        })
    ));

    // Nothing moves after stop.
    let (after, _) = wait_for(&events, Duration::from_millis(400), |_| false).await;
    assert!(after.is_empty(), "events after stop: {after:?}");
    assert_eq!(monitor.current_sleep_state(), SleepState::Awake);
    assert_eq!(fixture.wake.trigger_count(), 0);

    assert!(matches!(monitor.stop().await, Err(EngineError::NotRunning)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_permission_denied_is_reported_once() {
    let fixture = Fixture::relaxed(StillnessProfile::Still);
    fixture.biometric.set_authorized(false);
    let monitor = fixture.monitor(fast_config());

    assert!(matches!(
        monitor.start().await,
        Err(EngineError::PermissionDenied)
    ));
    assert!(!monitor.is_running().await);
    assert_eq!(fixture.motion.subscription_count(), 0);
    assert_eq!(monitor.current_sleep_state(), SleepState::Awake);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_denied_restart_keeps_running_session() {
    let fixture = Fixture::relaxed(StillnessProfile::Restless);
    let mut config = fast_config();
    config.session.nap_duration = Duration::from_secs(600);
    let monitor = fixture.monitor(config);
    let events = monitor.events();

    let first = monitor.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    fixture.biometric.set_authorized(false);
    assert!(matches!(
        monitor.start().await,
        Err(EngineError::PermissionDenied)
    ));
    assert!(monitor.is_running().await);
    assert_eq!(monitor.session_id().await, Some(first));
    assert_eq!(fixture.motion.subscription_count(), 1);
    assert!(fixture.motion.is_streaming());

    let summary = monitor.stop().await.unwrap();
    assert_eq!(summary.session_id, first);
    assert_eq!(summary.stop_reason, Some(StopReason::Requested));

    let drained: Vec<EngineEvent> = events.try_iter().collect();
    assert!(!drained.iter().any(|e| is_stop(e, StopReason::Replaced)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_accelerometer_keeps_awake() {
    let fixture =
        Fixture::relaxed(StillnessProfile::Still).with_motion(SimulatedMotionSource::unavailable());
    let monitor = fixture.monitor(fast_config());
    let events = monitor.events();

    monitor.start().await.unwrap();
    let (seen, hrv_met) = wait_for(&events, Duration::from_secs(5), |e| {
        matches!(e, EngineEvent::ConditionsChanged(c) if c.hrv)
    })
    .await;
    assert!(hrv_met, "HRV condition never held: {seen:?}");

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(monitor.is_running().await);
    assert_eq!(monitor.current_sleep_state(), SleepState::Awake);
    let conditions = monitor.condition_snapshot();
    assert!(conditions.hrv);
    assert!(!conditions.motion);
    assert!(!conditions.combined);

    monitor.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_replaces_running_session() {
    let fixture = Fixture::relaxed(StillnessProfile::Restless);
    let monitor = fixture.monitor(fast_config());
    let events = monitor.events();

    let first = monitor.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let second = monitor.start().await.unwrap();
    assert_ne!(first, second);
    assert_eq!(monitor.session_id().await, Some(second));

    let (seen, replaced) = wait_for(&events, Duration::from_secs(2), |e| {
        is_stop(e, StopReason::Replaced)
    })
    .await;
    assert!(replaced, "no replacement stop: {seen:?}");
    assert_eq!(fixture.motion.subscription_count(), 2);
    assert!(fixture.motion.is_streaming());

    monitor.stop().await.unwrap();
    assert!(!fixture.motion.is_streaming());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_background_delivery_failure_does_not_abort() {
    let fixture = Fixture::relaxed(StillnessProfile::Still);
    fixture.biometric.set_background_delivery_failure(true);
    let monitor = fixture.monitor(fast_config());

    monitor.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(monitor.is_running().await);
    assert!(monitor.stats().snapshot().ticks > 0);

    monitor.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readings_follow_live_hrv() {
    let fixture = Fixture::relaxed(StillnessProfile::Restless);
    let monitor = fixture.monitor(fast_config());
    let mut view = monitor.subscribe();

    monitor.start().await.unwrap();
    fixture.biometric.push_reading(HrvReading::new(Utc::now(), 71.5));

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut latest = None;
    while Instant::now() < deadline {
        if tokio::time::timeout(Duration::from_millis(200), view.changed())
            .await
            .is_ok()
        {
            latest = view.borrow_and_update().readings.hrv;
            if latest == Some(71.5) {
                break;
            }
        }
    }
    assert_eq!(latest, Some(71.5));
    assert_eq!(monitor.readings_snapshot().hrv, Some(71.5));
    assert!(!monitor.readings_snapshot().is_still);

    monitor.stop().await.unwrap();
}
