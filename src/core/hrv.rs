//! HRV signal processing.
//!
//! Tracks the most recent HRV reading and two rolling baselines (all
//! samples, and samples taken during local daytime hours). The HRV half
//! of the sleep condition holds when the current value clears the chosen
//! baseline by a configured multiplier.

use crate::config::{chrono_duration, BaselineKind, HrvConfig};
use crate::sources::types::HrvReading;
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::warn;

/// Baseline substituted when the history holds no usable samples.
pub const FALLBACK_BASELINE_MS: f64 = 50.0;

/// A rolling HRV baseline.
///
/// `value` is `None` until a computation has completed. A completed
/// computation over an empty history resolves to the fallback constant
/// with `is_fallback` set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub value: Option<f64>,
    /// History span the baseline covers
    pub source_window: std::time::Duration,
    /// Restricted to local daytime hours
    pub day_restricted: bool,
    pub sample_count: usize,
    pub is_fallback: bool,
    pub computed_at: Option<DateTime<Utc>>,
}

impl Baseline {
    /// A baseline with no computation yet.
    pub fn pending(source_window: std::time::Duration, day_restricted: bool) -> Self {
        Self {
            value: None,
            source_window,
            day_restricted,
            sample_count: 0,
            is_fallback: false,
            computed_at: None,
        }
    }

    /// Whether no computation has completed yet.
    pub fn is_pending(&self) -> bool {
        self.value.is_none()
    }
}

/// Outcome of a baseline query, produced off the tick loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineUpdate {
    pub computed_at: DateTime<Utc>,
    /// All-samples average, `None` when the history is empty or the query failed
    pub all_day: Option<f64>,
    pub all_day_count: usize,
    /// Daytime-restricted average
    pub daytime: Option<f64>,
    pub daytime_count: usize,
}

/// HRV condition: `current >= baseline * multiplier`, both strictly positive.
pub fn hrv_condition_met(current: Option<f64>, baseline: Option<f64>, multiplier: f64) -> bool {
    match (current, baseline) {
        (Some(current), Some(baseline)) if current > 0.0 && baseline > 0.0 => {
            current >= baseline * multiplier
        }
        _ => false,
    }
}

/// Pick the reading with the latest end time inside `[now - lookback, now]`.
pub fn latest_within(
    readings: &[HrvReading],
    now: DateTime<Utc>,
    lookback: std::time::Duration,
) -> Option<HrvReading> {
    let earliest = now - chrono_duration(lookback);
    readings
        .iter()
        .filter(|r| r.timestamp >= earliest && r.timestamp <= now)
        .max_by_key(|r| r.timestamp)
        .copied()
}

/// Average of valid readings, `None` when there are none.
pub fn average(readings: &[HrvReading]) -> Option<f64> {
    let values: Vec<f64> = readings
        .iter()
        .filter(|r| r.is_valid())
        .map(|r| r.value_ms)
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().mean())
    }
}

/// Readings whose local hour falls in `[start_hour, end_hour)`.
pub fn daytime_readings(
    readings: &[HrvReading],
    tz: Tz,
    start_hour: u32,
    end_hour: u32,
) -> Vec<HrvReading> {
    readings
        .iter()
        .filter(|r| {
            let hour = r.timestamp.with_timezone(&tz).hour();
            hour >= start_hour && hour < end_hour
        })
        .copied()
        .collect()
}

/// HRV state for one monitoring session.
#[derive(Debug, Clone)]
pub struct HrvProcessor {
    config: HrvConfig,
    current: Option<HrvReading>,
    all_day: Baseline,
    daytime: Baseline,
}

impl HrvProcessor {
    /// Create a processor with no reading and pending baselines.
    pub fn new(config: HrvConfig) -> Self {
        let window = config.baseline_window;
        Self {
            config,
            current: None,
            all_day: Baseline::pending(window, false),
            daytime: Baseline::pending(window, true),
        }
    }

    /// Accept a reading if it is at least as recent as the current one.
    ///
    /// Returns whether the current reading changed.
    pub fn ingest(&mut self, reading: HrvReading) -> bool {
        if !reading.value_ms.is_finite() {
            return false;
        }
        match self.current {
            Some(current) if current.timestamp > reading.timestamp => false,
            Some(current) if current == reading => false,
            _ => {
                self.current = Some(reading);
                true
            }
        }
    }

    /// Apply a finished baseline computation, substituting the fallback for empty results.
    pub fn apply_baseline(&mut self, update: BaselineUpdate) {
        let fallback = self.config.fallback_baseline_ms;
        resolve(&mut self.all_day, update.all_day, update.all_day_count, update.computed_at, fallback);
        resolve(&mut self.daytime, update.daytime, update.daytime_count, update.computed_at, fallback);
    }

    /// Drop the current reading if it exceeded the configured maximum age.
    pub fn expire_stale(&mut self, now: DateTime<Utc>) -> bool {
        let (Some(max_age), Some(current)) = (self.config.max_reading_age, self.current) else {
            return false;
        };
        if now - current.timestamp > chrono_duration(max_age) {
            self.current = None;
            true
        } else {
            false
        }
    }

    /// Most recent accepted reading.
    pub fn current(&self) -> Option<HrvReading> {
        self.current
    }

    /// Most recent value in ms.
    pub fn current_value(&self) -> Option<f64> {
        self.current.map(|r| r.value_ms)
    }

    /// Baseline the condition compares against.
    pub fn active_baseline(&self) -> &Baseline {
        match self.config.baseline_kind {
            BaselineKind::AllDay => &self.all_day,
            BaselineKind::Daytime => &self.daytime,
        }
    }

    /// Baseline over every sample in the window.
    pub fn all_day_baseline(&self) -> &Baseline {
        &self.all_day
    }

    /// Baseline over daytime samples only.
    pub fn daytime_baseline(&self) -> &Baseline {
        &self.daytime
    }

    /// Value of the active baseline.
    pub fn baseline_value(&self) -> Option<f64> {
        self.active_baseline().value
    }

    /// Value the current reading must reach, once a baseline exists.
    pub fn threshold(&self) -> Option<f64> {
        self.baseline_value().map(|b| b * self.config.multiplier)
    }

    /// Whether the HRV half of the sleep condition holds.
    pub fn condition_met(&self) -> bool {
        hrv_condition_met(self.current_value(), self.baseline_value(), self.config.multiplier)
    }

    /// `[start, end)` range for a baseline query ending at `now`.
    pub fn baseline_range(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - chrono_duration(self.config.baseline_window), now)
    }

    /// Get the HRV configuration.
    pub fn config(&self) -> &HrvConfig {
        &self.config
    }

    /// Forget the reading and both baselines.
    pub fn clear(&mut self) {
        let window = self.config.baseline_window;
        self.current = None;
        self.all_day = Baseline::pending(window, false);
        self.daytime = Baseline::pending(window, true);
    }
}

fn resolve(
    baseline: &mut Baseline,
    value: Option<f64>,
    count: usize,
    computed_at: DateTime<Utc>,
    fallback: f64,
) {
    let measured = value.filter(|v| v.is_finite() && *v > 0.0);
    if measured.is_none() {
        warn!(
            day_restricted = baseline.day_restricted,
            fallback, "no HRV history for baseline, using fallback"
        );
    }
    baseline.value = Some(measured.unwrap_or(fallback));
    baseline.is_fallback = measured.is_none();
    baseline.sample_count = if measured.is_some() { count } else { 0 };
    baseline.computed_at = Some(computed_at);
}
