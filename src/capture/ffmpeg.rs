//! Backend de câmera baseado em `ffmpeg` para dispositivos V4L2.
//!
//! Cada frame é obtido executando `ffmpeg` uma vez sobre `/dev/video{N}`
//! e lendo a imagem já codificada (PNG ou JPEG) da saída padrão.
//! O processo é morto se ultrapassar o tempo limite (`kill_on_drop`).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use super::{CameraBackend, CameraDevice, Frame};
use crate::error::CaptureError;

const DEFAULT_GRAB_TIMEOUT: Duration = Duration::from_secs(10);

/// Backend que captura frames de `/dev/video{N}` via `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FfmpegCamera {
    program: String,
    video_size: String,
    codec: &'static str,
    grab_timeout: Duration,
}

impl FfmpegCamera {
    /// Cria o backend; a extensão define o codec (`jpg`/`jpeg` → MJPEG, demais → PNG).
    pub fn new(extension: &str) -> Self {
        Self {
            program: "ffmpeg".to_string(),
            video_size: "1920x1080".to_string(),
            codec: codec_for(extension),
            grab_timeout: DEFAULT_GRAB_TIMEOUT,
        }
    }
}

fn codec_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "mjpeg",
        _ => "png",
    }
}

fn device_path(index: u32) -> PathBuf {
    PathBuf::from(format!("/dev/video{index}"))
}

impl CameraBackend for FfmpegCamera {
    type Device = FfmpegDevice;

    async fn open(&self, index: u32) -> Result<FfmpegDevice, CaptureError> {
        let path = device_path(index);
        tokio::fs::metadata(&path)
            .await
            .map_err(|e| CaptureError::Open {
                index,
                reason: format!("{}: {e}", path.display()),
            })?;
        Ok(FfmpegDevice {
            index,
            path,
            camera: self.clone(),
            open: true,
        })
    }

    async fn write_image(&self, path: &Path, frame: &Frame) -> Result<(), CaptureError> {
        tokio::fs::write(path, &frame.data)
            .await
            .map_err(|e| CaptureError::Write {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }
}

/// Dispositivo V4L2 aberto.
pub struct FfmpegDevice {
    index: u32,
    path: PathBuf,
    camera: FfmpegCamera,
    open: bool,
}

impl CameraDevice for FfmpegDevice {
    fn index(&self) -> u32 {
        self.index
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        if !self.open {
            return Err(CaptureError::DeviceUnavailable);
        }

        let child = Command::new(&self.camera.program)
            .args(["-hide_banner", "-loglevel", "error", "-f", "v4l2", "-video_size"])
            .arg(&self.camera.video_size)
            .arg("-i")
            .arg(&self.path)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", self.camera.codec, "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::Frame(format!("ffmpeg spawn failed: {e}")))?;

        let output = match tokio::time::timeout(self.camera.grab_timeout, child.wait_with_output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(CaptureError::Frame(format!("ffmpeg execution failed: {e}"))),
            Err(_) => {
                tracing::warn!(
                    device = %self.path.display(),
                    timeout = ?self.camera.grab_timeout,
                    "ffmpeg timeout, process killed via kill_on_drop"
                );
                return Err(CaptureError::Frame(format!(
                    "ffmpeg timeout ({:?})",
                    self.camera.grab_timeout
                )));
            }
        };

        if !output.status.success() {
            // Um dispositivo que sumiu (cabo USB) não volta sozinho.
            if tokio::fs::metadata(&self.path).await.is_err() {
                self.open = false;
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::Frame(format!("ffmpeg failed: {}", stderr.trim())));
        }
        if output.stdout.is_empty() {
            return Err(CaptureError::Frame("ffmpeg returned empty output".to_string()));
        }

        Ok(Frame {
            data: output.stdout,
        })
    }

    fn release(&mut self) {
        self.open = false;
    }
}
