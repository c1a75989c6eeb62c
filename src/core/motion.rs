//! Motion signal processing.
//!
//! Turns raw accelerometer samples into a stillness decision:
//! - short-window motion level for display
//! - long-window mean compared against an auto-adjusting threshold
//! - stillness edges and stillness duration

use crate::config::{chrono_duration, MotionConfig};
use crate::core::windowing::MotionWindow;
use crate::sources::types::{AccelerationSample, MotionSample};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// A contiguous period of stillness that is still ongoing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StillnessInterval {
    pub start: DateTime<Utc>,
    /// Elapsed time since `start` at the last processed sample
    pub duration: Duration,
}

/// Result of one processed sample, published to the tick loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionReport {
    /// Timestamp of the newest sample
    pub timestamp: DateTime<Utc>,
    /// Mean magnitude over the short view
    pub motion_level: f64,
    /// Mean magnitude over the long view
    pub long_average: f64,
    pub threshold: f64,
    pub is_still: bool,
    pub stillness: Option<StillnessInterval>,
    pub sample_count: usize,
}

impl MotionReport {
    /// Still, and continuously so for at least `duration` as of `now`.
    pub fn still_for(&self, duration: Duration, now: DateTime<Utc>) -> bool {
        self.stillness
            .map(|interval| now - interval.start >= duration)
            .unwrap_or(false)
    }
}

/// Stillness detector over a bounded motion window.
#[derive(Debug, Clone)]
pub struct MotionProcessor {
    config: MotionConfig,
    window: MotionWindow,
    threshold: f64,
    auto_adjust: bool,
    is_still: bool,
    still_start: Option<DateTime<Utc>>,
    still_duration: Duration,
    last_adjust_check: Option<DateTime<Utc>>,
}

impl MotionProcessor {
    /// Create a processor starting from the configured threshold.
    pub fn new(config: MotionConfig) -> Self {
        let window = MotionWindow::new(config.long_window, config.short_window);
        let threshold = config.threshold.clamp(config.threshold_min, config.threshold_max);
        let auto_adjust = config.auto_adjust;
        Self {
            config,
            window,
            threshold,
            auto_adjust,
            is_still: false,
            still_start: None,
            still_duration: Duration::zero(),
            last_adjust_check: None,
        }
    }

    /// Ingest a raw accelerometer sample.
    pub fn ingest_acceleration(&mut self, sample: &AccelerationSample) -> MotionReport {
        self.ingest(sample.to_motion_sample())
    }

    /// Ingest a gravity-removed magnitude sample.
    ///
    /// Non-finite magnitudes are dropped and the previous report is returned.
    pub fn ingest(&mut self, sample: MotionSample) -> MotionReport {
        if !sample.magnitude.is_finite() {
            debug!(magnitude = sample.magnitude, "dropping non-finite motion sample");
            let last = self.window.latest().map_or(sample.timestamp, |s| s.timestamp);
            return self.report(last);
        }
        let now = sample.timestamp;
        self.window.push(sample);
        self.maybe_adjust_threshold(now);
        self.update_stillness(now);
        self.report(now)
    }

    /// Set the threshold manually. Disables auto-adjustment.
    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = self.clamp_threshold(threshold);
        self.auto_adjust = false;
    }

    /// Turn threshold auto-adjustment on or off.
    pub fn set_auto_adjust(&mut self, enabled: bool) {
        self.auto_adjust = enabled;
        if enabled {
            self.last_adjust_check = None;
        }
    }

    /// Current stillness threshold in g.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Whether the threshold is still auto-adjusting.
    pub fn auto_adjust(&self) -> bool {
        self.auto_adjust
    }

    /// Mean of the short view, 0.0 before any sample.
    pub fn current_motion_level(&self) -> f64 {
        self.window.short_mean().unwrap_or(0.0)
    }

    /// Long-window mean below the threshold as of the last sample.
    pub fn is_still(&self) -> bool {
        self.is_still
    }

    /// Start of the ongoing stillness period.
    pub fn still_start(&self) -> Option<DateTime<Utc>> {
        self.still_start
    }

    /// Length of the ongoing stillness period at the last sample.
    pub fn still_duration(&self) -> Duration {
        self.still_duration
    }

    /// Still now, and continuously so for at least `duration`.
    pub fn has_been_still_for(&self, duration: Duration, now: DateTime<Utc>) -> bool {
        match (self.is_still, self.still_start) {
            (true, Some(start)) => now - start >= duration,
            _ => false,
        }
    }

    /// Whether the motion half of the sleep condition holds at `now`.
    pub fn condition_met(&self, now: DateTime<Utc>) -> bool {
        self.has_been_still_for(chrono_duration(self.config.min_stillness), now)
    }

    /// Number of samples in the long window.
    pub fn sample_count(&self) -> usize {
        self.window.len()
    }

    /// Get the underlying window.
    pub fn window(&self) -> &MotionWindow {
        &self.window
    }

    /// Drop all samples and stillness tracking. The threshold is kept.
    pub fn clear(&mut self) {
        self.window.clear();
        self.is_still = false;
        self.still_start = None;
        self.still_duration = Duration::zero();
        self.last_adjust_check = None;
    }

    fn report(&self, now: DateTime<Utc>) -> MotionReport {
        MotionReport {
            timestamp: now,
            motion_level: self.current_motion_level(),
            long_average: self.window.long_mean().unwrap_or(0.0),
            threshold: self.threshold,
            is_still: self.is_still,
            stillness: self.still_start.map(|start| StillnessInterval {
                start,
                duration: self.still_duration,
            }),
            sample_count: self.window.len(),
        }
    }

    fn update_stillness(&mut self, now: DateTime<Utc>) {
        let still_now = self.window.len() >= self.config.min_samples_for_stillness
            && self
                .window
                .long_mean()
                .map(|mean| mean < self.threshold)
                .unwrap_or(false);

        match (self.is_still, still_now) {
            (false, true) => {
                self.still_start = Some(now);
                self.still_duration = Duration::zero();
            }
            (true, false) => {
                self.still_start = None;
                self.still_duration = Duration::zero();
            }
            (true, true) => {
                if let Some(start) = self.still_start {
                    self.still_duration = now - start;
                }
            }
            (false, false) => {}
        }
        self.is_still = still_now;
    }

    fn maybe_adjust_threshold(&mut self, now: DateTime<Utc>) {
        if !self.auto_adjust {
            return;
        }

        let last = match self.last_adjust_check {
            Some(last) => last,
            None => {
                self.last_adjust_check = Some(now);
                return;
            }
        };
        if now - last < chrono_duration(self.config.adjust_interval) {
            return;
        }
        self.last_adjust_check = Some(now);

        if self.window.len() < self.config.adjust_min_samples {
            return;
        }
        if let Some((mean, std_dev)) = self.window.long_mean_and_std_dev() {
            let adjusted = self.clamp_threshold(mean + std_dev);
            debug!(
                previous = self.threshold,
                threshold = adjusted,
                mean,
                std_dev,
                "auto-adjusted motion threshold"
            );
            self.threshold = adjusted;
        }
    }

    fn clamp_threshold(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.threshold;
        }
        value.clamp(self.config.threshold_min, self.config.threshold_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn manual_config() -> MotionConfig {
        MotionConfig {
            auto_adjust: false,
            ..MotionConfig::default()
        }
    }

    fn feed(processor: &mut MotionProcessor, from: i64, count: i64, magnitude: f64) -> MotionReport {
        let mut last = None;
        for i in from..from + count {
            last = Some(processor.ingest(MotionSample::new(t(i), magnitude)));
        }
        last.unwrap()
    }

    #[test]
    fn test_constant_low_motion_is_still_once_window_fills() {
        let mut processor = MotionProcessor::new(MotionConfig::default());
        let report = feed(&mut processor, 0, 300, 0.01);
        assert!(report.is_still);
        assert!(processor.window().is_full());
        assert!((processor.current_motion_level() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_single_quiet_sample_is_still() {
        let mut processor = MotionProcessor::new(MotionConfig::default());
        let report = processor.ingest(MotionSample::new(t(0), 0.01));
        assert!(report.is_still);
        assert_eq!(processor.still_start(), Some(t(0)));
    }

    #[test]
    fn test_stillness_minimum_samples_is_opt_in() {
        let mut config = manual_config();
        config.min_samples_for_stillness = 20;
        let mut processor = MotionProcessor::new(config);
        let report = feed(&mut processor, 0, 19, 0.0);
        assert!(!report.is_still);
        let report = feed(&mut processor, 19, 1, 0.0);
        assert!(report.is_still);
        assert_eq!(processor.still_start(), Some(t(19)));
    }

    #[test]
    fn test_still_start_set_only_on_rising_edge() {
        let mut processor = MotionProcessor::new(manual_config());
        feed(&mut processor, 0, 20, 0.005);
        let start = processor.still_start();
        assert_eq!(start, Some(t(0)));

        feed(&mut processor, 20, 100, 0.005);
        assert_eq!(processor.still_start(), start);
        assert_eq!(processor.still_duration(), Duration::seconds(119));
    }

    #[test]
    fn test_movement_clears_stillness() {
        let mut config = manual_config();
        config.long_window = 20;
        let mut processor = MotionProcessor::new(config);
        feed(&mut processor, 0, 40, 0.005);
        assert!(processor.is_still());

        let report = feed(&mut processor, 40, 5, 0.5);
        assert!(!report.is_still);
        assert_eq!(report.stillness, None);
        assert_eq!(processor.still_start(), None);
        assert_eq!(processor.still_duration(), Duration::zero());
    }

    #[test]
    fn test_has_been_still_for() {
        let mut processor = MotionProcessor::new(manual_config());
        feed(&mut processor, 0, 80, 0.0);
        let start = processor.still_start().unwrap();
        assert!(processor.has_been_still_for(Duration::seconds(60), start + Duration::seconds(60)));
        assert!(!processor.has_been_still_for(Duration::seconds(61), start + Duration::seconds(60)));
    }

    #[test]
    fn test_min_stillness_gates_condition() {
        let mut config = manual_config();
        config.min_stillness = std::time::Duration::from_secs(30);
        let mut processor = MotionProcessor::new(config);

        let report = feed(&mut processor, 0, 20, 0.0);
        assert!(report.is_still);
        assert!(!processor.condition_met(t(19)));
        assert!(!report.still_for(Duration::seconds(30), t(19)));

        let report = feed(&mut processor, 20, 30, 0.0);
        assert!(processor.condition_met(t(49)));
        assert!(report.still_for(Duration::seconds(30), t(49)));
    }

    #[test]
    fn test_auto_adjust_waits_for_min_samples() {
        let mut config = MotionConfig::default();
        config.adjust_min_samples = 60;
        let mut processor = MotionProcessor::new(config);

        // First check happens at t=60 with 61 samples.
        feed(&mut processor, 0, 50, 0.04);
        assert_eq!(processor.threshold(), 0.02);
        feed(&mut processor, 50, 11, 0.04);
        assert!((processor.threshold() - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_auto_adjust_skipped_when_window_too_small() {
        let mut config = MotionConfig::default();
        config.long_window = 50;
        config.short_window = 10;
        let mut processor = MotionProcessor::new(config);
        feed(&mut processor, 0, 200, 0.04);
        assert_eq!(processor.threshold(), 0.02);
    }

    #[test]
    fn test_auto_adjust_stays_in_range() {
        let distributions: [&[f64]; 4] = [
            &[0.0],
            &[5.0, 0.0, 9.0],
            &[0.001, 0.002],
            &[0.03, 0.5, 0.02, 0.0, 1.0],
        ];
        for magnitudes in distributions {
            let mut processor = MotionProcessor::new(MotionConfig::default());
            for i in 0..400 {
                let m = magnitudes[i as usize % magnitudes.len()];
                processor.ingest(MotionSample::new(t(i), m));
                assert!((0.015..=0.05).contains(&processor.threshold()));
            }
        }
    }

    #[test]
    fn test_manual_threshold_disables_auto_adjust_and_is_clamped() {
        let mut processor = MotionProcessor::new(MotionConfig::default());
        processor.set_threshold(0.5);
        assert!(!processor.auto_adjust());
        assert_eq!(processor.threshold(), 0.05);

        feed(&mut processor, 0, 200, 0.001);
        assert_eq!(processor.threshold(), 0.05);

        processor.set_threshold(0.0);
        assert_eq!(processor.threshold(), 0.015);
    }

    #[test]
    fn test_non_finite_samples_are_dropped() {
        let mut processor = MotionProcessor::new(MotionConfig::default());
        let before = feed(&mut processor, 0, 299, 0.005);
        assert!(before.is_still);

        let report = processor.ingest(MotionSample::new(t(299), f64::NAN));
        assert_eq!(report, before);
        let report = processor.ingest(MotionSample::new(t(300), f64::INFINITY));
        assert_eq!(report, before);
        assert_eq!(processor.sample_count(), 299);

        let report = feed(&mut processor, 301, 280, 0.005);
        assert!(report.is_still);
        assert!(report.long_average.is_finite());
        assert_eq!(processor.still_start(), Some(t(0)));
    }

    #[test]
    fn test_acceleration_ingest_uses_gravity_removed_magnitude() {
        let mut processor = MotionProcessor::new(manual_config());
        let report = processor.ingest_acceleration(&AccelerationSample::new(t(0), 0.0, 0.0, 1.1));
        assert!((report.motion_level - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_clear_resets_tracking() {
        let mut processor = MotionProcessor::new(manual_config());
        feed(&mut processor, 0, 30, 0.0);
        processor.clear();
        assert_eq!(processor.sample_count(), 0);
        assert!(!processor.is_still());
        assert_eq!(processor.still_start(), None);
        assert_eq!(processor.current_motion_level(), 0.0);
    }
}
