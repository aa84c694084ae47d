use std::path::Path;

use chrono::Local;
use tokio::time::sleep;

use super::{CameraBackend, CameraDevice, CaptureLabel, CaptureSettings};
use crate::error::CaptureError;

const TIMESTAMP_FORMAT: &str = "%d.%m.%Y_%H.%M.%S";

/// Runs capture sessions against the camera, one at a time.
///
/// A frame read or write failure aborts the session, switches to the
/// alternate device and replays the whole session once. There is no second retry.
pub struct CaptureOrchestrator<B: CameraBackend> {
    backend: B,
    settings: CaptureSettings,
    device: Option<B::Device>,
}

impl<B: CameraBackend> CaptureOrchestrator<B> {
    pub fn new(backend: B, settings: CaptureSettings) -> Self {
        Self {
            backend,
            settings,
            device: None,
        }
    }

    /// Index of the currently open device, if any.
    pub fn device_index(&self) -> Option<u32> {
        self.device.as_ref().filter(|d| d.is_open()).map(|d| d.index())
    }

    /// Open the configured device, falling back to the alternate one.
    /// Returns `false` when neither could be opened.
    pub async fn open_initial(&mut self) -> bool {
        let primary = self.settings.camera_index;
        match self.backend.open(primary).await {
            Ok(device) => {
                important!(index = primary, "video device opened");
                self.device = Some(device);
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to open primary video device");
                self.switch_device(primary).await.is_ok()
            }
        }
    }

    /// Record one session for `label`. Returns the number of frames written.
    pub async fn capture(&mut self, label: &CaptureLabel) -> Result<usize, CaptureError> {
        let dir = self.settings.directory(label);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| CaptureError::Directory {
                path: dir.clone(),
                source,
            })?;

        match self.run_session(&dir).await {
            Ok(written) => Ok(written),
            Err(e) if e.is_device_failure() => {
                important!(error = %e, %label, "error during image capture or save, retrying with a different camera");
                let failed = self
                    .device
                    .as_ref()
                    .map_or(self.settings.camera_index, |d| d.index());
                self.switch_device(failed).await?;
                self.run_session(&dir)
                    .await
                    .map_err(|e| CaptureError::Exhausted {
                        reason: e.to_string(),
                    })
            }
            Err(e) => Err(e),
        }
    }

    /// Close the current device.
    pub fn release(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.release();
        }
    }

    async fn switch_device(&mut self, failed: u32) -> Result<(), CaptureError> {
        self.release();
        let next = self.settings.alternate_index(failed);
        important!(index = next, "switching to camera index {next}");
        match self.backend.open(next).await {
            Ok(device) => {
                self.device = Some(device);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, index = next, "failed to open alternate video device");
                Err(CaptureError::Exhausted {
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn run_session(&mut self, dir: &Path) -> Result<usize, CaptureError> {
        let device = match self.device.as_mut() {
            Some(device) if device.is_open() => device,
            _ => return Err(CaptureError::DeviceUnavailable),
        };

        for _ in 0..self.settings.warmup_frames {
            if let Err(e) = device.read_frame().await {
                tracing::debug!(error = %e, "warm-up read failed");
                return Err(e);
            }
        }

        let frames = self.settings.frames_per_session();
        for index in 0..frames {
            let frame = device.read_frame().await?;
            let timestamp = Local::now().format(TIMESTAMP_FORMAT);
            let path = dir.join(format!("{timestamp}_{index}.{}", self.settings.extension));
            self.backend.write_image(&path, &frame).await?;
            important!(path = %path.display(), "image successfully saved");

            if index + 1 < frames {
                sleep(self.settings.frame_pause).await;
            }
        }

        Ok(frames)
    }
}
