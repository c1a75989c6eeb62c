//! Error types for napwatch.

use thiserror::Error;

/// Errors surfaced to the caller of session start/stop.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Biometric authorization was denied")]
    PermissionDenied,

    #[error("No monitoring session is running")]
    NotRunning,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Errors reported by acquisition collaborators.
///
/// These never cross the processor boundary: callers map them to an
/// empty/fallback value and log them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Biometric query failed: {0}")]
    QueryFailed(String),

    #[error("Sensor unavailable: {0}")]
    Unavailable(String),

    #[error("Background delivery failed: {0}")]
    BackgroundDelivery(String),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts_into_engine_error() {
        let err: EngineError = ConfigError::InvalidValue {
            field: "state_machine.tick_interval",
            reason: "must be non-zero".to_string(),
        }
        .into();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
        assert_eq!(
            err.to_string(),
            "Invalid configuration: Invalid value for state_machine.tick_interval: must be non-zero"
        );
    }

    #[test]
    fn test_source_errors_carry_their_cause() {
        let err = SourceError::Unavailable("no accelerometer".to_string());
        assert_eq!(err.to_string(), "Sensor unavailable: no accelerometer");
    }
}
