use std::path::PathBuf;

use thiserror::Error;

/// Malformed configuration. The only error class allowed to abort startup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("policy entry {index} ({entry:?}): expected `value;delay;strategy`, got {fields} field(s)")]
    Arity {
        index: usize,
        entry: String,
        fields: usize,
    },

    #[error("policy entry {index} ({entry:?}): {field} is not a number")]
    NotNumeric {
        index: usize,
        entry: String,
        field: &'static str,
    },

    #[error("policy entry {index} ({entry:?}): delay must be a finite, non-negative number of seconds")]
    InvalidDelay { index: usize, entry: String },

    #[error("policy entry {index} ({entry:?}): unknown strategy code {code}")]
    UnknownStrategy {
        index: usize,
        entry: String,
        code: i64,
    },

    #[error("policy entry {index} ({entry:?}): continuous capture needs a delay greater than zero")]
    ZeroInterval { index: usize, entry: String },

    #[error("environment variable {name}={value:?} is not valid: {reason}")]
    InvalidEnv {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Camera and image I/O failures raised by a capture session.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("video device is not initialized or has been closed")]
    DeviceUnavailable,

    #[error("failed to open video device {index}: {reason}")]
    Open { index: u32, reason: String },

    #[error("failed to capture frame: {0}")]
    Frame(String),

    #[error("failed to save image {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("failed to create directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("capture failed on both video devices: {reason}")]
    Exhausted { reason: String },
}

impl CaptureError {
    /// Whether a device-fallback retry may recover from this failure.
    pub fn is_device_failure(&self) -> bool {
        matches!(self, CaptureError::Frame(_) | CaptureError::Write { .. })
    }
}

/// Why a matched trigger did not turn into a capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkipReason {
    /// The gate tag is configured but has not reported the ready value.
    GateNotReady { observed: Option<f64>, ready: f64 },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::GateNotReady {
                observed: Some(value),
                ready,
            } => write!(f, "gate not ready (value {value}, expected {ready})"),
            SkipReason::GateNotReady {
                observed: None,
                ready,
            } => write!(f, "gate not ready (no value yet, expected {ready})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::Arity {
            index: 1,
            entry: "2;5".into(),
            fields: 2,
        };
        assert_eq!(
            err.to_string(),
            "policy entry 1 (\"2;5\"): expected `value;delay;strategy`, got 2 field(s)"
        );
    }

    #[test]
    fn only_frame_and_write_failures_are_retryable() {
        assert!(CaptureError::Frame("timeout".into()).is_device_failure());
        assert!(
            CaptureError::Write {
                path: "x.png".into(),
                reason: "disk full".into()
            }
            .is_device_failure()
        );
        assert!(!CaptureError::DeviceUnavailable.is_device_failure());
        assert!(
            !CaptureError::Directory {
                path: "data".into(),
                source: std::io::Error::other("denied"),
            }
            .is_device_failure()
        );
    }

    #[test]
    fn skip_reason_display() {
        let skip = SkipReason::GateNotReady {
            observed: Some(0.0),
            ready: 128.0,
        };
        assert_eq!(skip.to_string(), "gate not ready (value 0, expected 128)");

        let skip = SkipReason::GateNotReady {
            observed: None,
            ready: 128.0,
        };
        assert_eq!(skip.to_string(), "gate not ready (no value yet, expected 128)");
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ConfigError>();
        assert_send_sync::<CaptureError>();
    }
}
