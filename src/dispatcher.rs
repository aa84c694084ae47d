use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

use crate::capture::{CameraBackend, CaptureOrchestrator};
use crate::state_machine::{Action, ProductDetector, StepController};
use crate::tags::TagEvent;

/// Single consumer of routed tag events.
///
/// Owns the step controller, the product detector and the camera, so
/// notification handling, timer firing and capture sessions never overlap.
/// Events that arrive while a session is running wait in the channel.
pub struct Dispatcher<B: CameraBackend> {
    controller: StepController,
    detector: ProductDetector,
    capture: CaptureOrchestrator<B>,
}

impl<B: CameraBackend> Dispatcher<B> {
    pub fn new(controller: StepController, capture: CaptureOrchestrator<B>) -> Self {
        Self {
            controller,
            detector: ProductDetector::new(),
            capture,
        }
    }

    /// Drain `events` until every sender is gone, firing the controller's
    /// pending timer in between. Returns the camera so the caller can release it.
    pub async fn run(mut self, mut events: mpsc::Receiver<TagEvent>) -> CaptureOrchestrator<B> {
        loop {
            let deadline = self.controller.next_deadline();
            tokio::select! {
                // A notification already queued wins over a timer due at the same time.
                biased;
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = wait_for(deadline) => {
                    if let Some(action) = self.controller.on_timer(Instant::now()) {
                        self.execute(action).await;
                    }
                }
            }
        }
        tracing::info!("event channel closed, dispatcher stopping");
        self.capture
    }

    async fn handle_event(&mut self, event: TagEvent) {
        match event {
            TagEvent::Step(value) => {
                tracing::debug!(value, "step notification");
                for action in self.controller.on_step(value, Instant::now()) {
                    self.execute(action).await;
                }
                tracing::trace!(state = ?self.controller.state(), "controller updated");
            }
            TagEvent::Gate(value) => {
                tracing::debug!(value, "gate notification");
                self.controller.on_gate(value);
            }
            TagEvent::Product(value) => {
                tracing::debug!(value, "product notification");
                if let Some(action) = self.detector.on_product(value) {
                    self.execute(action).await;
                }
            }
            TagEvent::Reset => {
                tracing::debug!("subscription rebuilt, resetting baselines");
                self.controller.reset();
                self.detector.reset();
            }
        }
    }

    async fn execute(&mut self, action: Action) {
        match action {
            Action::Capture(label) => match self.capture.capture(&label).await {
                Ok(frames) => important!(%label, frames, "capture session complete"),
                Err(e) => important!(%label, error = %e, "capture failed"),
            },
            Action::Skip { label, reason } => {
                important!(%label, %reason, "capture skipped");
            }
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
