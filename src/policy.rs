//! Step policies: which step values trigger a capture, and how.
//!
//! The table is parsed once from the `VALID_STEPS` string
//! (`value;delay;strategy` entries separated by commas) and is read-only afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

/// A step value rounded to one decimal place, used as the policy lookup key
/// and as the capture directory label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StepKey(String);

impl StepKey {
    /// Round a raw tag reading to one decimal place. Negative zero folds into `0.0`.
    ///
    /// Rounds the exact binary value half-to-even, so `0.15` (stored as
    /// 0.1499...) becomes `0.1` and the tie `0.25` becomes `0.2`.
    pub fn normalize(raw: f64) -> Self {
        let text = format!("{raw:.1}");
        if text == "-0.0" {
            return Self("0.0".to_string());
        }
        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What happens when the step enters (or leaves) a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Capture as soon as the step is entered.
    Immediate,
    /// Capture once, `delay` after the step is entered.
    DelayedOnce,
    /// Capture on entry and then every `delay` while the step holds.
    Continuous,
    /// Nothing on entry; capture the step when it is left.
    ExitOnly,
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::Immediate => write!(f, "immediate"),
            CaptureMode::DelayedOnce => write!(f, "delayed"),
            CaptureMode::Continuous => write!(f, "continuous"),
            CaptureMode::ExitOnly => write!(f, "exit-only"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepPolicy {
    pub key: StepKey,
    pub delay: Duration,
    pub mode: CaptureMode,
}

/// Immutable mapping from normalized step value to its policy.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    entries: BTreeMap<StepKey, StepPolicy>,
}

// Strategy codes as they appear in the deployed configuration strings.
const STRATEGY_TIMED: i64 = 1;
const STRATEGY_EXIT: i64 = 2;
const STRATEGY_CONTINUOUS: i64 = 3;

impl PolicyTable {
    /// Parse a `value;delay;strategy[,value;delay;strategy...]` string.
    ///
    /// Strategy `1` is immediate when the delay is zero and delayed-once otherwise,
    /// `2` is exit-only and `3` is continuous. When a step value appears twice the
    /// last entry wins.
    pub fn parse(config: &str) -> Result<Self, ConfigError> {
        let mut entries = BTreeMap::new();

        for (index, raw_entry) in config.split(',').enumerate() {
            let entry = raw_entry.trim();
            if entry.is_empty() {
                continue;
            }

            let fields: Vec<&str> = entry.split(';').map(str::trim).collect();
            if fields.len() != 3 {
                return Err(ConfigError::Arity {
                    index,
                    entry: entry.to_string(),
                    fields: fields.len(),
                });
            }

            let not_numeric = |field| ConfigError::NotNumeric {
                index,
                entry: entry.to_string(),
                field,
            };
            let value: f64 = fields[0].parse().map_err(|_| not_numeric("value"))?;
            let delay_secs: f64 = fields[1].parse().map_err(|_| not_numeric("delay"))?;
            let code: i64 = fields[2].parse().map_err(|_| not_numeric("strategy"))?;

            if !value.is_finite() {
                return Err(not_numeric("value"));
            }
            let delay = Duration::try_from_secs_f64(delay_secs).map_err(|_| {
                ConfigError::InvalidDelay {
                    index,
                    entry: entry.to_string(),
                }
            })?;

            let mode = match code {
                STRATEGY_TIMED if delay.is_zero() => CaptureMode::Immediate,
                STRATEGY_TIMED => CaptureMode::DelayedOnce,
                STRATEGY_EXIT => CaptureMode::ExitOnly,
                STRATEGY_CONTINUOUS if delay.is_zero() => {
                    return Err(ConfigError::ZeroInterval {
                        index,
                        entry: entry.to_string(),
                    });
                }
                STRATEGY_CONTINUOUS => CaptureMode::Continuous,
                other => {
                    return Err(ConfigError::UnknownStrategy {
                        index,
                        entry: entry.to_string(),
                        code: other,
                    });
                }
            };

            let key = StepKey::normalize(value);
            entries.insert(key.clone(), StepPolicy { key, delay, mode });
        }

        Ok(Self { entries })
    }

    pub fn lookup(&self, key: &StepKey) -> Option<&StepPolicy> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Policies in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = &StepPolicy> {
        self.entries.values()
    }
}
