use std::time::Duration;

use tokio::time::Instant;

use crate::capture::CaptureLabel;
use crate::error::SkipReason;
use crate::policy::{CaptureMode, StepKey};

/// What the dispatcher must do after the controller processed an input.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Run a capture session for this label.
    Capture(CaptureLabel),
    /// A capture was due but is not allowed right now.
    Skip {
        label: CaptureLabel,
        reason: SkipReason,
    },
}

/// The single scheduled capture a controller may own.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTimer {
    pub key: StepKey,
    pub due: Instant,
    /// `Some(interval)` for a continuous loop, `None` for a one-shot.
    pub repeat: Option<Duration>,
}

/// Mutable state of the step controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerState {
    pub last_key: Option<StepKey>,
    pub last_mode: Option<CaptureMode>,
    pub pending_timer: Option<PendingTimer>,
    /// False until the first step notification has set the baseline.
    pub initialized: bool,
    pub gate_value: Option<f64>,
}
