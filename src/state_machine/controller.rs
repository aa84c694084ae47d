use tokio::time::Instant;

use super::state::{Action, ControllerState, PendingTimer};
use crate::capture::CaptureLabel;
use crate::error::SkipReason;
use crate::policy::{CaptureMode, PolicyTable, StepKey, StepPolicy};

/// Turns step-tag notifications into capture actions.
///
/// The controller is pure: it never sleeps or touches the camera. Callers
/// feed it notifications and timer expirations with the current instant and
/// execute the returned [`Action`]s. It owns at most one [`PendingTimer`];
/// every step notification cancels it before doing anything else.
pub struct StepController {
    policies: PolicyTable,
    /// Ready value of the gate tag, when a gate tag is configured.
    gate_ready: Option<f64>,
    state: ControllerState,
}

impl StepController {
    pub fn new(policies: PolicyTable, gate_ready: Option<f64>) -> Self {
        Self {
            policies,
            gate_ready,
            state: ControllerState::default(),
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// When the pending timer (if any) comes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.state.pending_timer.as_ref().map(|t| t.due)
    }

    /// Forget everything learned so far; the next step value is a new baseline.
    pub fn reset(&mut self) {
        if let Some(timer) = &self.state.pending_timer {
            tracing::debug!(key = %timer.key, "pending capture cancelled by reset");
        }
        let gate_value = self.state.gate_value;
        self.state = ControllerState {
            gate_value,
            ..ControllerState::default()
        };
    }

    pub fn on_gate(&mut self, raw: f64) {
        self.state.gate_value = Some(raw);
    }

    /// Handle a new value of the step tag.
    ///
    /// - The first value only sets the baseline.
    /// - Leaving a run of an exit-only step captures that step.
    /// - Entering a step runs its entry action (capture now, arm a one-shot
    ///   timer, or start a continuous loop).
    /// - With the gate closed every capture becomes a [`Action::Skip`] and no
    ///   timer is armed, but the baseline still advances.
    pub fn on_step(&mut self, raw: f64, now: Instant) -> Vec<Action> {
        let key = StepKey::normalize(raw);
        let policy = self.policies.lookup(&key).cloned();

        if let Some(timer) = self.state.pending_timer.take() {
            tracing::debug!(key = %timer.key, "cancelled pending capture due to new step");
        }

        if !self.state.initialized {
            tracing::info!(%key, "step baseline established");
            self.state.initialized = true;
            self.remember(key, policy.as_ref());
            return Vec::new();
        }

        let mut captures = Vec::new();
        let mut timer = None;

        if self.leaving_exit_run(&key, policy.as_ref())
            && let Some(previous) = &self.state.last_key
        {
            captures.push(CaptureLabel::Step(previous.clone()));
        }

        if let Some(policy) = &policy {
            match policy.mode {
                CaptureMode::Immediate => captures.push(CaptureLabel::Step(key.clone())),
                CaptureMode::DelayedOnce => {
                    timer = Some(PendingTimer {
                        key: key.clone(),
                        due: now + policy.delay,
                        repeat: None,
                    });
                }
                CaptureMode::Continuous => {
                    captures.push(CaptureLabel::Step(key.clone()));
                    timer = Some(PendingTimer {
                        key: key.clone(),
                        due: now + policy.delay,
                        repeat: Some(policy.delay),
                    });
                }
                CaptureMode::ExitOnly => {}
            }
        }

        let actions = match self.gate_check() {
            Ok(()) => {
                if let Some(timer) = &timer {
                    tracing::debug!(key = %timer.key, delay = ?(timer.due - now), "capture scheduled");
                }
                self.state.pending_timer = timer;
                captures.into_iter().map(Action::Capture).collect()
            }
            Err(reason) => captures
                .into_iter()
                .chain(timer.map(|t| CaptureLabel::Step(t.key)))
                .map(|label| Action::Skip { label, reason })
                .collect(),
        };

        self.remember(key, policy.as_ref());
        actions
    }

    /// Fire the pending timer if it is due at `now`.
    ///
    /// A continuous loop re-checks that its step is still the current one and
    /// re-arms itself on the original cadence, skipping ticks it has missed.
    pub fn on_timer(&mut self, now: Instant) -> Option<Action> {
        let timer = self.state.pending_timer.take()?;
        if timer.due > now {
            self.state.pending_timer = Some(timer);
            return None;
        }

        if let Some(interval) = timer.repeat {
            if self.state.last_key.as_ref() != Some(&timer.key) {
                tracing::debug!(key = %timer.key, "stopping continuous capture, step changed");
                return None;
            }
            let mut due = timer.due + interval;
            while due <= now {
                due += interval;
            }
            self.state.pending_timer = Some(PendingTimer {
                key: timer.key.clone(),
                due,
                repeat: Some(interval),
            });
        }

        let label = CaptureLabel::Step(timer.key);
        Some(match self.gate_check() {
            Ok(()) => Action::Capture(label),
            Err(reason) => Action::Skip { label, reason },
        })
    }

    fn gate_check(&self) -> Result<(), SkipReason> {
        match self.gate_ready {
            Some(ready) if self.state.gate_value != Some(ready) => Err(SkipReason::GateNotReady {
                observed: self.state.gate_value,
                ready,
            }),
            _ => Ok(()),
        }
    }

    // True when the previous step was exit-only and `key` ends that run.
    fn leaving_exit_run(&self, key: &StepKey, policy: Option<&StepPolicy>) -> bool {
        if self.state.last_mode != Some(CaptureMode::ExitOnly) {
            return false;
        }
        match policy {
            Some(p) if p.mode == CaptureMode::ExitOnly => self.state.last_key.as_ref() != Some(key),
            _ => true,
        }
    }

    fn remember(&mut self, key: StepKey, policy: Option<&StepPolicy>) {
        self.state.last_mode = policy.map(|p| p.mode);
        self.state.last_key = Some(key);
    }
}
