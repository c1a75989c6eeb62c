//! Session statistics and summaries.
//!
//! Counters are atomics so ingestion workers and the tick loop can record
//! without sharing a lock.

use crate::core::snapshot::StopReason;
use crate::core::state_machine::Transition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::warn;
use uuid::Uuid;

/// Counters for one monitoring session.
#[derive(Debug)]
pub struct SessionStats {
    motion_samples: AtomicU64,
    hrv_readings: AtomicU64,
    baseline_refreshes: AtomicU64,
    ticks: AtomicU64,
    transitions: AtomicU64,
    session_start: RwLock<DateTime<Utc>>,
    persist_path: Option<PathBuf>,
}

impl SessionStats {
    /// Create zeroed in-memory stats.
    pub fn new() -> Self {
        Self {
            motion_samples: AtomicU64::new(0),
            hrv_readings: AtomicU64::new(0),
            baseline_refreshes: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            transitions: AtomicU64::new(0),
            session_start: RwLock::new(Utc::now()),
            persist_path: None,
        }
    }

    /// Create stats that accumulate into a JSON file across runs.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            warn!(error = %e, "could not load previous session stats");
        }

        stats
    }

    /// Record an accelerometer sample.
    pub fn record_motion_sample(&self) {
        self.motion_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an HRV reading.
    pub fn record_hrv_reading(&self) {
        self.hrv_readings.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed baseline computation.
    pub fn record_baseline_refresh(&self) {
        self.baseline_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tick evaluation.
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a sleep state transition.
    pub fn record_transition(&self) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark the start of a new session for duration reporting.
    pub fn mark_session_start(&self, at: DateTime<Utc>) {
        if let Ok(mut start) = self.session_start.write() {
            *start = at;
        }
    }

    /// Get a point-in-time copy of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let session_start = self
            .session_start
            .read()
            .map(|s| *s)
            .unwrap_or_else(|_| Utc::now());
        StatsSnapshot {
            motion_samples: self.motion_samples.load(Ordering::Relaxed),
            hrv_readings: self.hrv_readings.load(Ordering::Relaxed),
            baseline_refreshes: self.baseline_refreshes.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            session_start,
            session_duration_secs: (Utc::now() - session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Session Statistics:\n\
             - Motion samples processed: {}\n\
             - HRV readings processed: {}\n\
             - Baseline refreshes: {}\n\
             - Ticks evaluated: {}\n\
             - State transitions: {}\n\
             - Session duration: {} seconds",
            stats.motion_samples,
            stats.hrv_readings,
            stats.baseline_refreshes,
            stats.ticks,
            stats.transitions,
            stats.session_duration_secs
        )
    }

    /// Save counters to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.snapshot();
            let persisted = PersistedStats {
                motion_samples: stats.motion_samples,
                hrv_readings: stats.hrv_readings,
                baseline_refreshes: stats.baseline_refreshes,
                ticks: stats.ticks,
                transitions: stats.transitions,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.motion_samples
                    .store(persisted.motion_samples, Ordering::Relaxed);
                self.hrv_readings
                    .store(persisted.hrv_readings, Ordering::Relaxed);
                self.baseline_refreshes
                    .store(persisted.baseline_refreshes, Ordering::Relaxed);
                self.ticks.store(persisted.ticks, Ordering::Relaxed);
                self.transitions
                    .store(persisted.transitions, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Zero every counter.
    pub fn reset(&self) {
        self.motion_samples.store(0, Ordering::Relaxed);
        self.hrv_readings.store(0, Ordering::Relaxed);
        self.baseline_refreshes.store(0, Ordering::Relaxed);
        self.ticks.store(0, Ordering::Relaxed);
        self.transitions.store(0, Ordering::Relaxed);
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub motion_samples: u64,
    pub hrv_readings: u64,
    pub baseline_refreshes: u64,
    pub ticks: u64,
    pub transitions: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    motion_samples: u64,
    hrv_readings: u64,
    baseline_refreshes: u64,
    ticks: u64,
    transitions: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared stats.
pub type SharedSessionStats = Arc<SessionStats>;

/// Record of one finished session, exported as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub stop_reason: Option<StopReason>,
    /// First confirmed sleep onset
    pub sleep_onset: Option<DateTime<Utc>>,
    pub wake_triggered_at: Option<DateTime<Utc>>,
    pub transitions: Vec<Transition>,
}

impl SessionSummary {
    /// Start an empty summary.
    pub fn new(session_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            started_at,
            stopped_at: None,
            stop_reason: None,
            sleep_onset: None,
            wake_triggered_at: None,
            transitions: Vec::new(),
        }
    }

    /// Append a transition, noting the first sleep onset.
    pub fn record_transition(&mut self, transition: Transition) {
        if self.sleep_onset.is_none() {
            self.sleep_onset = transition.sleep_start_time;
        }
        self.transitions.push(transition);
    }

    /// Mark the session stopped.
    pub fn finish(&mut self, at: DateTime<Utc>, reason: StopReason) {
        self.stopped_at = Some(at);
        self.stop_reason = Some(reason);
    }

    /// Write as `session_<timestamp>.json` under `dir`, returning the path.
    pub fn export(&self, dir: &Path) -> Result<PathBuf, std::io::Error> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!(
            "session_{}.json",
            self.started_at.format("%Y%m%d_%H%M%S")
        ));
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}
