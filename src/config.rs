//! Configuration for the napwatch engine.

use crate::error::ConfigError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub motion: MotionConfig,
    pub hrv: HrvConfig,
    pub state_machine: StateMachineConfig,
    pub session: SessionConfig,

    /// Path for exporting session summaries
    pub export_path: PathBuf,

    /// Path for storing session statistics
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("napwatch");

        Self {
            motion: MotionConfig::default(),
            hrv: HrvConfig::default(),
            state_machine: StateMachineConfig::default(),
            session: SessionConfig::default(),
            export_path: data_dir.join("sessions"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content =
                std::fs::read_to_string(&config_path).map_err(|e| ConfigError::Io(e.to_string()))?;
            let config: Config =
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("napwatch")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path).map_err(|e| ConfigError::Io(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.motion.validate()?;
        self.hrv.validate()?;

        if self.state_machine.tick_interval.is_zero() {
            return Err(invalid("state_machine.tick_interval", "must be non-zero"));
        }
        if self.session.nap_duration.is_zero() {
            return Err(invalid("session.nap_duration", "must be non-zero"));
        }
        Ok(())
    }

    /// Compress every session-level cadence and window by `factor`.
    ///
    /// Sample counts and the baseline history window are left alone, so a
    /// scaled session behaves like a real one played back faster.
    pub fn time_scaled(&self, factor: f64) -> Config {
        let factor = if factor.is_finite() && factor > 0.0 { factor } else { 1.0 };
        let scale = |d: Duration| Duration::from_secs_f64(d.as_secs_f64() / factor);

        let mut scaled = self.clone();
        scaled.motion.adjust_interval = scale(self.motion.adjust_interval);
        scaled.motion.min_stillness = scale(self.motion.min_stillness);
        scaled.motion.sample_interval = scale(self.motion.sample_interval);
        scaled.motion.publish_interval = scale(self.motion.publish_interval);
        scaled.hrv.lookback = scale(self.hrv.lookback);
        scaled.hrv.baseline_refresh_interval = scale(self.hrv.baseline_refresh_interval);
        scaled.hrv.max_reading_age = self.hrv.max_reading_age.map(scale);
        scaled.state_machine.confirmation_window = scale(self.state_machine.confirmation_window);
        scaled.state_machine.disturbed_timeout = scale(self.state_machine.disturbed_timeout);
        scaled.state_machine.tick_interval = scale(self.state_machine.tick_interval);
        scaled.session.nap_duration = scale(self.session.nap_duration);
        scaled
    }
}

/// Motion processor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Samples kept in the long (threshold) window
    pub long_window: usize,
    /// Samples in the short (responsiveness) view
    pub short_window: usize,
    /// Initial stillness threshold in g
    pub threshold: f64,
    pub threshold_min: f64,
    pub threshold_max: f64,
    /// Derive the threshold from recent motion statistics
    pub auto_adjust: bool,
    #[serde(with = "duration_serde")]
    pub adjust_interval: Duration,
    /// Long-window samples required before an adjustment
    pub adjust_min_samples: usize,
    /// Long-window samples required before stillness is judged at all.
    /// 1 judges from the first sample; raise it to ignore a sparse window.
    pub min_samples_for_stillness: usize,
    /// Continuous stillness required for the motion condition
    #[serde(with = "duration_serde")]
    pub min_stillness: Duration,
    /// Nominal accelerometer sampling interval
    #[serde(with = "duration_serde")]
    pub sample_interval: Duration,
    /// How often the motion worker publishes a report
    #[serde(with = "duration_serde")]
    pub publish_interval: Duration,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            long_window: 300,
            short_window: 20,
            threshold: 0.02,
            threshold_min: 0.015,
            threshold_max: 0.05,
            auto_adjust: true,
            adjust_interval: Duration::from_secs(60),
            adjust_min_samples: 60,
            min_samples_for_stillness: 1,
            min_stillness: Duration::ZERO,
            sample_interval: Duration::from_secs(1),
            publish_interval: Duration::from_secs(2),
        }
    }
}

impl MotionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.long_window == 0 || self.short_window == 0 {
            return Err(invalid("motion.long_window", "window sizes must be non-zero"));
        }
        if self.short_window > self.long_window {
            return Err(invalid(
                "motion.short_window",
                format!(
                    "short window ({}) exceeds long window ({})",
                    self.short_window, self.long_window
                ),
            ));
        }
        if !(self.threshold_min > 0.0 && self.threshold_min <= self.threshold_max) {
            return Err(invalid(
                "motion.threshold_min",
                format!(
                    "range [{}, {}] is empty or non-positive",
                    self.threshold_min, self.threshold_max
                ),
            ));
        }
        if self.sample_interval.is_zero() {
            return Err(invalid("motion.sample_interval", "must be non-zero"));
        }
        Ok(())
    }
}

/// Which rolling baseline the HRV condition compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineKind {
    /// Every sample of the baseline window
    AllDay,
    /// Only samples taken during local daytime hours
    Daytime,
}

/// HRV processor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HrvConfig {
    /// Current HRV must reach `baseline * multiplier`
    pub multiplier: f64,
    #[serde(with = "duration_serde")]
    pub baseline_window: Duration,
    pub baseline_kind: BaselineKind,
    /// First local hour counted as daytime (inclusive)
    pub daytime_start_hour: u32,
    /// Local hour daytime ends (exclusive)
    pub daytime_end_hour: u32,
    /// IANA timezone used for the daytime filter
    pub timezone: String,
    /// Lookback for the latest-value fetch
    #[serde(with = "duration_serde")]
    pub lookback: Duration,
    /// Baseline used when the history holds no samples
    pub fallback_baseline_ms: f64,
    #[serde(with = "duration_serde")]
    pub baseline_refresh_interval: Duration,
    /// Drop the current reading once it is older than this
    #[serde(with = "option_duration_serde", default)]
    pub max_reading_age: Option<Duration>,
}

impl Default for HrvConfig {
    fn default() -> Self {
        Self {
            multiplier: 1.15,
            baseline_window: Duration::from_secs(7 * 24 * 60 * 60),
            baseline_kind: BaselineKind::Daytime,
            daytime_start_hour: 6,
            daytime_end_hour: 22,
            timezone: "UTC".to_string(),
            lookback: Duration::from_secs(10 * 60),
            fallback_baseline_ms: crate::core::hrv::FALLBACK_BASELINE_MS,
            baseline_refresh_interval: Duration::from_secs(30 * 60),
            max_reading_age: None,
        }
    }
}

impl HrvConfig {
    /// Parse the configured timezone.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.timezone.clone()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.multiplier.is_finite() && self.multiplier > 0.0) {
            return Err(invalid("hrv.multiplier", "must be positive"));
        }
        if self.daytime_start_hour >= self.daytime_end_hour || self.daytime_end_hour > 24 {
            return Err(invalid(
                "hrv.daytime_start_hour",
                format!(
                    "[{}, {}) is not a valid hour range",
                    self.daytime_start_hour, self.daytime_end_hour
                ),
            ));
        }
        if !(self.fallback_baseline_ms > 0.0) {
            return Err(invalid("hrv.fallback_baseline_ms", "must be positive"));
        }
        self.tz()?;
        Ok(())
    }
}

/// Sleep state machine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMachineConfig {
    /// Continuous hold required before PotentialSleep becomes Asleep
    #[serde(with = "duration_serde")]
    pub confirmation_window: Duration,
    /// Time in Disturbed before giving up on the sleep episode
    #[serde(with = "duration_serde")]
    pub disturbed_timeout: Duration,
    #[serde(with = "duration_serde")]
    pub tick_interval: Duration,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            confirmation_window: Duration::from_secs(180),
            disturbed_timeout: Duration::from_secs(120),
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// Nap session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Nap budget, counted from confirmed sleep onset once detected
    #[serde(with = "duration_serde")]
    pub nap_duration: Duration,
    pub wake_strength: u8,
    pub wake_with_sound: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            nap_duration: Duration::from_secs(20 * 60),
            wake_strength: 3,
            wake_with_sound: true,
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

/// Convert a configured duration into chrono arithmetic.
pub(crate) fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
