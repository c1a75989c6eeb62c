//! Live monitoring runtime.
//!
//! ```text
//!   MotionSource ──samples──▶ [motion worker] ──MotionReport──┐
//!   BiometricSource ─signal─▶ [hrv worker] ───HrvReading──────┤
//!   BiometricSource ─range──▶ [spawn_blocking] ─Baseline──────┤
//!                                                             ▼
//!                                            [tick task: NapPipeline]
//!                                              │            │
//!                                   watch<EngineView>  EngineEvent channel
//! ```
//!
//! Workers hand results to the tick task over channels; only the tick
//! task touches the pipeline. One session runs at a time.

use crate::config::{chrono_duration, Config, HrvConfig, MotionConfig};
use crate::core::hrv::{average, daytime_readings, BaselineUpdate};
use crate::core::motion::{MotionProcessor, MotionReport};
use crate::core::snapshot::{ConditionSnapshot, EngineEvent, EngineView, ReadingsSnapshot, StopReason};
use crate::core::state_machine::SleepState;
use crate::error::{EngineError, SourceError};
use crate::session::pipeline::NapPipeline;
use crate::session::stats::{SessionStats, SessionSummary, SharedSessionStats};
use crate::sources::types::{AccelerationSample, BiometricMetric, HrvReading};
use crate::sources::{BiometricSource, MotionSource, WakeSignal};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How often idle workers re-check the running flag.
const WORKER_POLL: Duration = Duration::from_millis(100);

/// Capacity of the outgoing event queue. Events are dropped when nobody reads.
const EVENT_QUEUE: usize = 4_096;

/// The three collaborators a session consumes.
#[derive(Clone)]
pub struct Collaborators {
    pub biometric: Arc<dyn BiometricSource>,
    pub motion: Arc<dyn MotionSource>,
    pub wake: Arc<dyn WakeSignal>,
}

/// Compute both baselines for a query window ending at `now`.
///
/// Query failures are logged and count as "no samples", which the HRV
/// processor then resolves to the fallback baseline.
pub fn compute_baselines(
    source: &dyn BiometricSource,
    config: &HrvConfig,
    now: DateTime<Utc>,
) -> BaselineUpdate {
    let start = now - chrono_duration(config.baseline_window);
    let metric = BiometricMetric::HrvSdnn;

    let samples = match source.query_samples(metric, start, now) {
        Ok(samples) => samples,
        Err(e) => {
            warn!(error = %e, "HRV history query failed");
            Vec::new()
        }
    };
    let all_day_count = samples.iter().filter(|r| r.is_valid()).count();
    let all_day = match source.query_average(metric, start, now) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "HRV average query failed");
            average(&samples)
        }
    };

    let daytime = match config.tz() {
        Ok(tz) => daytime_readings(&samples, tz, config.daytime_start_hour, config.daytime_end_hour),
        Err(e) => {
            warn!(error = %e, "daytime filter unavailable");
            Vec::new()
        }
    };

    BaselineUpdate {
        computed_at: now,
        all_day,
        all_day_count,
        daytime: average(&daytime),
        daytime_count: daytime.iter().filter(|r| r.is_valid()).count(),
    }
}

struct ActiveSession {
    id: Uuid,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<SessionSummary>,
    workers: Vec<JoinHandle<()>>,
}

/// Owns the collaborators and runs one monitoring session at a time.
pub struct Monitor {
    config: Config,
    sources: Collaborators,
    stats: SharedSessionStats,
    view_tx: watch::Sender<EngineView>,
    event_tx: Sender<EngineEvent>,
    event_rx: Receiver<EngineEvent>,
    session: Mutex<Option<ActiveSession>>,
}

impl Monitor {
    /// Create an idle monitor with fresh statistics.
    pub fn new(config: Config, sources: Collaborators) -> Self {
        Self::with_stats(config, sources, Arc::new(SessionStats::new()))
    }

    /// Create an idle monitor that accumulates into shared statistics.
    pub fn with_stats(config: Config, sources: Collaborators, stats: SharedSessionStats) -> Self {
        let (view_tx, _) = watch::channel(EngineView::default());
        let (event_tx, event_rx) = bounded(EVENT_QUEUE);
        Self {
            config,
            sources,
            stats,
            view_tx,
            event_tx,
            event_rx,
            session: Mutex::new(None),
        }
    }

    /// Start a session, replacing any running one.
    ///
    /// Authorization is requested first: when it is denied a running session
    /// is left untouched. Must be called from within a tokio runtime.
    pub async fn start(&self) -> Result<Uuid, EngineError> {
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::Runtime(e.to_string()))?;

        let mut slot = self.session.lock().await;
        if !self.sources.biometric.request_authorization() {
            warn!("biometric authorization denied");
            return Err(EngineError::PermissionDenied);
        }

        if let Some(previous) = slot.take() {
            self.finish(previous, StopReason::Replaced).await;
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let running = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let mut pipeline = NapPipeline::new(&self.config, now);
        let mut workers = Vec::new();

        self.stats.mark_session_start(now);
        self.view_tx.send_replace(pipeline.view());
        publish(&self.event_tx, EngineEvent::SessionStarted { session_id: id, at: now });
        info!(session_id = %id, nap_secs = self.config.session.nap_duration.as_secs(), "session started");

        let (report_tx, report_rx) = unbounded();
        match self.start_motion(report_tx, running.clone()) {
            Ok(handle) => workers.push(handle),
            Err(e) => {
                warn!(error = %e, "motion unavailable");
                pipeline.mark_motion_unavailable();
            }
        }

        let (hrv_tx, hrv_rx) = unbounded();
        if let Err(e) = self
            .sources
            .biometric
            .enable_background_delivery(BiometricMetric::HrvSdnn)
        {
            warn!(error = %e, "background delivery registration failed");
        }
        match self.start_hrv(hrv_tx, running.clone()) {
            Ok(handle) => workers.push(handle),
            Err(e) => warn!(error = %e, "HRV updates unavailable"),
        }

        let (baseline_tx, baseline_rx) = unbounded();
        let tick = TickLoop {
            session_id: id,
            config: self.config.clone(),
            sources: self.sources.clone(),
            stats: self.stats.clone(),
            view_tx: self.view_tx.clone(),
            event_tx: self.event_tx.clone(),
            running: running.clone(),
            cancel: cancel.clone(),
            reports: report_rx,
            readings: hrv_rx,
            baselines: baseline_rx,
            baseline_tx,
        };
        let task = runtime.spawn(tick.run(pipeline, now));

        *slot = Some(ActiveSession {
            id,
            cancel,
            running,
            task,
            workers,
        });
        Ok(id)
    }

    /// Stop the running session. The machine is frozen at Awake when this returns.
    ///
    /// Also returns the summary of a session that already ended on its own.
    pub async fn stop(&self) -> Result<SessionSummary, EngineError> {
        let session = self.session.lock().await.take();
        match session {
            Some(session) => Ok(self.finish(session, StopReason::Requested).await),
            None => Err(EngineError::NotRunning),
        }
    }

    /// Whether a session is live (started and not yet woken or stopped).
    pub async fn is_running(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| s.running.load(Ordering::SeqCst))
    }

    /// Id of the current session, kept after a wake until `stop`.
    pub async fn session_id(&self) -> Option<Uuid> {
        self.session.lock().await.as_ref().map(|s| s.id)
    }

    /// Current sleep state.
    pub fn current_sleep_state(&self) -> SleepState {
        self.view_tx.borrow().state
    }

    /// Latest evaluated sleep conditions.
    pub fn condition_snapshot(&self) -> ConditionSnapshot {
        self.view_tx.borrow().conditions
    }

    /// Latest raw readings for display.
    pub fn readings_snapshot(&self) -> ReadingsSnapshot {
        self.view_tx.borrow().readings
    }

    /// Copy of the whole exposed view.
    pub fn view(&self) -> EngineView {
        *self.view_tx.borrow()
    }

    /// Watch the exposed view; it changes at most once per tick.
    pub fn subscribe(&self) -> watch::Receiver<EngineView> {
        self.view_tx.subscribe()
    }

    /// Change events. Clones share one queue.
    pub fn events(&self) -> Receiver<EngineEvent> {
        self.event_rx.clone()
    }

    /// Get the session statistics.
    pub fn stats(&self) -> &SharedSessionStats {
        &self.stats
    }

    /// Get the configuration sessions run with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn finish(&self, session: ActiveSession, reason: StopReason) -> SessionSummary {
        session.running.store(false, Ordering::SeqCst);
        session.cancel.cancel();

        let mut summary = match session.task.await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "tick task ended abnormally");
                let mut fallback = SessionSummary::new(session.id, Utc::now());
                self.view_tx.send_replace(EngineView::default());
                fallback.finish(Utc::now(), reason);
                fallback
            }
        };

        let workers = session.workers;
        if let Err(e) = tokio::task::spawn_blocking(move || {
            for worker in workers {
                let _ = worker.join();
            }
        })
        .await
        {
            warn!(error = %e, "worker join failed");
        }

        if summary.stop_reason.is_none() {
            let at = Utc::now();
            summary.finish(at, reason);
            publish(&self.event_tx, EngineEvent::SessionStopped { at, reason });
            info!(session_id = %session.id, ?reason, "session stopped");
        }
        summary
    }

    fn start_motion(
        &self,
        reports: Sender<MotionReport>,
        running: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>, SourceError> {
        let source = &self.sources.motion;
        if !source.is_available() {
            return Err(SourceError::Unavailable("accelerometer not present".to_string()));
        }
        let samples = source.subscribe(self.config.motion.sample_interval)?;
        let config = self.config.motion.clone();
        let stats = self.stats.clone();

        std::thread::Builder::new()
            .name("napwatch-motion".to_string())
            .spawn(move || motion_worker(config, samples, reports, running, stats))
            .map_err(|e| {
                source.unsubscribe();
                SourceError::Unavailable(e.to_string())
            })
    }

    fn start_hrv(
        &self,
        readings: Sender<HrvReading>,
        running: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>, SourceError> {
        let source = self.sources.biometric.clone();
        let updates = source.subscribe_updates(BiometricMetric::HrvSdnn)?;
        let lookback = self.config.hrv.lookback;
        let stats = self.stats.clone();

        std::thread::Builder::new()
            .name("napwatch-hrv".to_string())
            .spawn(move || hrv_worker(source, updates, lookback, readings, running, stats))
            .map_err(|e| SourceError::Unavailable(e.to_string()))
    }
}

fn publish(events: &Sender<EngineEvent>, event: EngineEvent) {
    if let Err(TrySendError::Full(event)) = events.try_send(event) {
        debug!(kind = event.kind(), "event queue full, dropping event");
    }
}

/// Owns the motion processor. Publishes a report every `publish_interval`
/// of sample time, and immediately on a stillness edge.
fn motion_worker(
    config: MotionConfig,
    samples: Receiver<AccelerationSample>,
    reports: Sender<MotionReport>,
    running: Arc<AtomicBool>,
    stats: SharedSessionStats,
) {
    let publish_every = chrono_duration(config.publish_interval);
    let mut processor = MotionProcessor::new(config);
    let mut last_published: Option<DateTime<Utc>> = None;
    let mut last_still = false;

    while running.load(Ordering::SeqCst) {
        match samples.recv_timeout(WORKER_POLL) {
            Ok(sample) => {
                stats.record_motion_sample();
                let report = processor.ingest_acceleration(&sample);
                let due = last_published.map_or(true, |at| report.timestamp - at >= publish_every);
                if due || report.is_still != last_still {
                    last_published = Some(report.timestamp);
                    last_still = report.is_still;
                    if reports.send(report).is_err() {
                        break;
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("motion stream disconnected");
                break;
            }
        }
    }
    debug!(samples = processor.sample_count(), "motion worker stopped");
}

/// Re-queries the latest reading on every update signal.
fn hrv_worker(
    source: Arc<dyn BiometricSource>,
    updates: Receiver<()>,
    lookback: Duration,
    readings: Sender<HrvReading>,
    running: Arc<AtomicBool>,
    stats: SharedSessionStats,
) {
    let fetch = || match source.observe_latest(BiometricMetric::HrvSdnn, lookback) {
        Ok(reading) => reading,
        Err(e) => {
            warn!(error = %e, "latest HRV query failed");
            None
        }
    };

    if let Some(reading) = fetch() {
        stats.record_hrv_reading();
        if readings.send(reading).is_err() {
            return;
        }
    }

    while running.load(Ordering::SeqCst) {
        match updates.recv_timeout(WORKER_POLL) {
            Ok(()) => {
                if let Some(reading) = fetch() {
                    stats.record_hrv_reading();
                    if readings.send(reading).is_err() {
                        break;
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("HRV update stream closed");
                break;
            }
        }
    }
}

/// State moved into the tick task.
struct TickLoop {
    session_id: Uuid,
    config: Config,
    sources: Collaborators,
    stats: SharedSessionStats,
    view_tx: watch::Sender<EngineView>,
    event_tx: Sender<EngineEvent>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    reports: Receiver<MotionReport>,
    readings: Receiver<HrvReading>,
    baselines: Receiver<BaselineUpdate>,
    baseline_tx: Sender<BaselineUpdate>,
}

impl TickLoop {
    async fn run(self, mut pipeline: NapPipeline, started: DateTime<Utc>) -> SessionSummary {
        let mut summary = SessionSummary::new(self.session_id, started);
        let refresh_every = chrono_duration(self.config.hrv.baseline_refresh_interval);
        let mut last_refresh = started;
        self.request_baselines(started);

        let mut interval = tokio::time::interval(self.config.state_machine.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let now = Utc::now();
            if now - last_refresh >= refresh_every {
                last_refresh = now;
                self.request_baselines(now);
            }
            self.drain(&mut pipeline);

            let outcome = pipeline.tick(now);
            self.stats.record_tick();
            if let Some(transition) = outcome.transition {
                self.stats.record_transition();
                summary.record_transition(transition);
            }
            for event in outcome.events {
                publish(&self.event_tx, event);
            }
            self.view_tx.send_if_modified(|view| {
                let next = pipeline.view();
                let changed = *view != next;
                *view = next;
                changed
            });

            if let Some(wake) = outcome.wake {
                info!(
                    session_id = %self.session_id,
                    strength = wake.strength,
                    with_sound = wake.with_sound,
                    "nap complete, triggering wake"
                );
                self.sources.wake.trigger(wake.strength, wake.with_sound);
                summary.wake_triggered_at = Some(wake.at);
                self.teardown(&mut pipeline);
                summary.finish(wake.at, StopReason::WakeCompleted);
                publish(
                    &self.event_tx,
                    EngineEvent::SessionStopped {
                        at: wake.at,
                        reason: StopReason::WakeCompleted,
                    },
                );
                info!(session_id = %self.session_id, "session stopped after wake");
                return summary;
            }
        }

        self.teardown(&mut pipeline);
        summary
    }

    /// Stop workers and collaborators, then freeze the pipeline at Awake.
    fn teardown(&self, pipeline: &mut NapPipeline) {
        self.running.store(false, Ordering::SeqCst);
        self.sources.motion.unsubscribe();
        if let Err(e) = self
            .sources
            .biometric
            .disable_background_delivery(BiometricMetric::HrvSdnn)
        {
            warn!(error = %e, "background delivery deregistration failed");
        }
        pipeline.stop(Utc::now());
        self.view_tx.send_replace(pipeline.view());
    }

    fn drain(&self, pipeline: &mut NapPipeline) {
        for update in self.baselines.try_iter() {
            self.stats.record_baseline_refresh();
            pipeline.apply_baseline(update);
        }
        for reading in self.readings.try_iter() {
            pipeline.ingest_hrv(reading);
        }
        if let Some(report) = self.reports.try_iter().last() {
            pipeline.apply_motion_report(report);
        }
    }

    /// Run the baseline query off the tick loop; the result lands on a later tick.
    fn request_baselines(&self, now: DateTime<Utc>) {
        let source = self.sources.biometric.clone();
        let config = self.config.hrv.clone();
        let tx = self.baseline_tx.clone();
        tokio::task::spawn_blocking(move || {
            let update = compute_baselines(source.as_ref(), &config, now);
            debug!(
                all_day = ?update.all_day,
                daytime = ?update.daytime,
                "baseline query finished"
            );
            let _ = tx.send(update);
        });
    }
}
