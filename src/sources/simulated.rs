//! In-process sources for tests, the CLI and demos.
//!
//! These stand in for a host's health store, accelerometer and haptics.
//! The motion source runs a producer thread like a real sensor callback
//! would, so the engine sees the same threading it sees in production.

use crate::core::hrv::{average, latest_within};
use crate::error::SourceError;
use crate::sources::types::{AccelerationSample, BiometricMetric, HrvReading};
use crate::sources::{BiometricSource, MotionSource, WakeSignal};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct BiometricState {
    history: Vec<HrvReading>,
    authorized: bool,
    fail_queries: bool,
    fail_background_delivery: bool,
    background_enabled: bool,
    subscribers: Vec<Sender<()>>,
}

/// Biometric source backed by an in-memory HRV history.
#[derive(Debug)]
pub struct ScriptedBiometricSource {
    state: Mutex<BiometricState>,
}

impl ScriptedBiometricSource {
    /// An authorized source with an empty history.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BiometricState {
                authorized: true,
                ..BiometricState::default()
            }),
        }
    }

    /// Authorized source holding `history`.
    pub fn with_history(history: Vec<HrvReading>) -> Self {
        let source = Self::new();
        lock(&source.state).history = history;
        source
    }

    /// Readings every `spacing` over the `days` before `now`, all at `value_ms`.
    pub fn with_steady_history(now: DateTime<Utc>, days: i64, spacing: chrono::Duration, value_ms: f64) -> Self {
        let mut history = Vec::new();
        let mut at = now - chrono::Duration::days(days);
        while at < now {
            history.push(HrvReading::new(at, value_ms));
            at += spacing;
        }
        Self::with_history(history)
    }

    /// Answer for the next authorization request.
    pub fn set_authorized(&self, authorized: bool) {
        lock(&self.state).authorized = authorized;
    }

    /// Make every query return [`SourceError::QueryFailed`].
    pub fn set_query_failure(&self, fail: bool) {
        lock(&self.state).fail_queries = fail;
    }

    /// Make background delivery registration fail.
    pub fn set_background_delivery_failure(&self, fail: bool) {
        lock(&self.state).fail_background_delivery = fail;
    }

    /// Append a reading and signal every subscriber.
    pub fn push_reading(&self, reading: HrvReading) {
        let mut state = lock(&self.state);
        state.history.push(reading);
        // Disconnected subscribers are dropped; a full queue already has a pending signal.
        state
            .subscribers
            .retain(|tx| !matches!(tx.try_send(()), Err(crossbeam_channel::TrySendError::Disconnected(_))));
    }

    /// Whether background delivery is registered.
    pub fn background_delivery_enabled(&self) -> bool {
        lock(&self.state).background_enabled
    }

    /// Number of live update subscriptions.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.state).subscribers.len()
    }

    fn readings_in(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<HrvReading>, SourceError> {
        let state = lock(&self.state);
        if state.fail_queries {
            return Err(SourceError::QueryFailed("scripted failure".to_string()));
        }
        Ok(state
            .history
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp < end)
            .copied()
            .collect())
    }
}

impl Default for ScriptedBiometricSource {
    fn default() -> Self {
        Self::new()
    }
}

impl BiometricSource for ScriptedBiometricSource {
    fn request_authorization(&self) -> bool {
        lock(&self.state).authorized
    }

    fn query_average(
        &self,
        _metric: BiometricMetric,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<f64>, SourceError> {
        Ok(average(&self.readings_in(start, end)?))
    }

    fn query_samples(
        &self,
        _metric: BiometricMetric,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HrvReading>, SourceError> {
        self.readings_in(start, end)
    }

    fn observe_latest(
        &self,
        _metric: BiometricMetric,
        lookback: Duration,
    ) -> Result<Option<HrvReading>, SourceError> {
        let state = lock(&self.state);
        if state.fail_queries {
            return Err(SourceError::QueryFailed("scripted failure".to_string()));
        }
        Ok(latest_within(&state.history, Utc::now(), lookback))
    }

    fn subscribe_updates(&self, _metric: BiometricMetric) -> Result<Receiver<()>, SourceError> {
        let (tx, rx) = bounded(1);
        lock(&self.state).subscribers.push(tx);
        Ok(rx)
    }

    fn enable_background_delivery(&self, _metric: BiometricMetric) -> Result<(), SourceError> {
        let mut state = lock(&self.state);
        if state.fail_background_delivery {
            return Err(SourceError::BackgroundDelivery("scripted failure".to_string()));
        }
        state.background_enabled = true;
        Ok(())
    }

    fn disable_background_delivery(&self, _metric: BiometricMetric) -> Result<(), SourceError> {
        let mut state = lock(&self.state);
        state.background_enabled = false;
        state.subscribers.clear();
        Ok(())
    }
}

/// Stillness over time for the simulated wearer.
#[derive(Debug, Clone, PartialEq)]
pub enum StillnessProfile {
    Still,
    Restless,
    /// Restless until the given offset, still afterwards
    SettlesAfter(Duration),
    /// Consecutive `(length, still)` phases; the last one lasts forever
    Phases(Vec<(Duration, bool)>),
}

impl StillnessProfile {
    /// Whether the wearer is still `elapsed` after subscribing.
    pub fn is_still_at(&self, elapsed: Duration) -> bool {
        match self {
            StillnessProfile::Still => true,
            StillnessProfile::Restless => false,
            StillnessProfile::SettlesAfter(offset) => elapsed >= *offset,
            StillnessProfile::Phases(phases) => {
                let mut end = Duration::ZERO;
                for (length, still) in phases {
                    end += *length;
                    if elapsed < end {
                        return *still;
                    }
                }
                phases.last().map(|(_, still)| *still).unwrap_or(true)
            }
        }
    }
}

#[derive(Debug)]
struct Producer {
    running: Arc<AtomicBool>,
}

/// Accelerometer driven by a [`StillnessProfile`] on a producer thread.
#[derive(Debug)]
pub struct SimulatedMotionSource {
    available: bool,
    profile: StillnessProfile,
    seed: u64,
    producer: Mutex<Option<Producer>>,
    subscriptions: Mutex<usize>,
}

impl SimulatedMotionSource {
    /// Create an available source following `profile`.
    pub fn new(profile: StillnessProfile) -> Self {
        Self {
            available: true,
            profile,
            seed: 7,
            producer: Mutex::new(None),
            subscriptions: Mutex::new(0),
        }
    }

    /// A source reporting no accelerometer hardware.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(StillnessProfile::Restless)
        }
    }

    /// Seed the sample noise.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Whether the producer thread is running.
    pub fn is_streaming(&self) -> bool {
        lock(&self.producer).is_some()
    }

    /// Total successful `subscribe` calls.
    pub fn subscription_count(&self) -> usize {
        *lock(&self.subscriptions)
    }
}

/// One accelerometer sample around 1 g with stillness-dependent noise.
fn synthesize(rng: &mut StdRng, still: bool, at: DateTime<Utc>) -> AccelerationSample {
    if still {
        let jitter = 0.004;
        AccelerationSample::new(
            at,
            rng.gen_range(-jitter..jitter),
            rng.gen_range(-jitter..jitter),
            1.0 + rng.gen_range(-jitter..jitter),
        )
    } else {
        let swing = rng.gen_range(0.1..0.5);
        AccelerationSample::new(
            at,
            rng.gen_range(-swing..swing),
            rng.gen_range(-swing..swing),
            1.0 + swing,
        )
    }
}

impl MotionSource for SimulatedMotionSource {
    fn is_available(&self) -> bool {
        self.available
    }

    fn subscribe(&self, interval: Duration) -> Result<Receiver<AccelerationSample>, SourceError> {
        if !self.available {
            return Err(SourceError::Unavailable("no accelerometer".to_string()));
        }
        self.unsubscribe();

        let (tx, rx) = bounded(1_024);
        let running = Arc::new(AtomicBool::new(true));
        let profile = self.profile.clone();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let thread_running = running.clone();

        std::thread::Builder::new()
            .name("napwatch-sim-motion".to_string())
            .spawn(move || {
                let started = Instant::now();
                while thread_running.load(Ordering::SeqCst) {
                    let still = profile.is_still_at(started.elapsed());
                    let sample = synthesize(&mut rng, still, Utc::now());
                    if tx.send(sample).is_err() {
                        break;
                    }
                    std::thread::sleep(interval);
                }
                debug!("simulated motion producer stopped");
            })
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        *lock(&self.producer) = Some(Producer { running });
        *lock(&self.subscriptions) += 1;
        Ok(rx)
    }

    fn unsubscribe(&self) {
        if let Some(producer) = lock(&self.producer).take() {
            producer.running.store(false, Ordering::SeqCst);
        }
    }
}

/// One recorded wake request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeRecord {
    pub at: DateTime<Utc>,
    pub strength: u8,
    pub with_sound: bool,
}

/// Wake signal that records each trigger.
#[derive(Debug, Default)]
pub struct RecordingWakeSignal {
    triggers: Mutex<Vec<WakeRecord>>,
}

impl RecordingWakeSignal {
    /// Create a signal with no triggers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every trigger so far, oldest first.
    pub fn triggers(&self) -> Vec<WakeRecord> {
        lock(&self.triggers).clone()
    }

    /// Number of triggers so far.
    pub fn trigger_count(&self) -> usize {
        lock(&self.triggers).len()
    }
}

impl WakeSignal for RecordingWakeSignal {
    fn trigger(&self, strength: u8, with_sound: bool) {
        lock(&self.triggers).push(WakeRecord {
            at: Utc::now(),
            strength,
            with_sound,
        });
    }
}
