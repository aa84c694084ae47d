//! Camera access and capture sessions.
//!
//! [`CaptureOrchestrator`] runs one bounded session at a time against a
//! [`CameraBackend`]; [`FfmpegCamera`] is the backend used in production.

pub mod ffmpeg;
pub mod session;

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::CaptureError;
use crate::policy::StepKey;

pub use ffmpeg::FfmpegCamera;
pub use session::CaptureOrchestrator;

/// Hard limit on frames per session, whatever the configuration says.
pub const MAX_FRAMES: usize = 100;

/// Directory label used for product-change captures.
pub const PRODUCT_CHANGE_LABEL: &str = "CIP";

/// One encoded image as produced by the camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
}

/// Which subdirectory a capture session writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureLabel {
    Step(StepKey),
    ProductChange,
}

impl CaptureLabel {
    pub fn dir_name(&self) -> &str {
        match self {
            CaptureLabel::Step(key) => key.as_str(),
            CaptureLabel::ProductChange => PRODUCT_CHANGE_LABEL,
        }
    }
}

impl fmt::Display for CaptureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl From<StepKey> for CaptureLabel {
    fn from(key: StepKey) -> Self {
        CaptureLabel::Step(key)
    }
}

/// Opens video devices and persists frames.
pub trait CameraBackend: Send + Sync {
    type Device: CameraDevice;

    fn open(&self, index: u32) -> impl Future<Output = Result<Self::Device, CaptureError>> + Send;

    fn write_image(
        &self,
        path: &Path,
        frame: &Frame,
    ) -> impl Future<Output = Result<(), CaptureError>> + Send;
}

/// An opened video device.
pub trait CameraDevice: Send {
    fn index(&self) -> u32;

    fn is_open(&self) -> bool;

    fn read_frame(&mut self) -> impl Future<Output = Result<Frame, CaptureError>> + Send;

    fn release(&mut self);
}

/// Everything a capture session needs besides the device itself.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub base_path: PathBuf,
    pub equipment: String,
    pub frame_count: usize,
    /// Stale frames read and thrown away before recording; 0 disables.
    pub warmup_frames: usize,
    pub frame_pause: Duration,
    pub extension: String,
    pub camera_index: u32,
    pub fallback_index: u32,
}

impl CaptureSettings {
    /// `{base}/{equipment}/{label}`
    pub fn directory(&self, label: &CaptureLabel) -> PathBuf {
        self.base_path.join(&self.equipment).join(label.dir_name())
    }

    /// The device to switch to when `current` fails.
    pub fn alternate_index(&self, current: u32) -> u32 {
        if current == self.camera_index {
            self.fallback_index
        } else {
            self.camera_index
        }
    }

    pub fn frames_per_session(&self) -> usize {
        self.frame_count.min(MAX_FRAMES)
    }
}
