use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Camera,
    Microphone,
    Speaker,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceKind::Camera => "camera",
            DeviceKind::Microphone => "microphone",
            DeviceKind::Speaker => "speaker",
        })
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("{0} permission denied")]
    PermissionDenied(DeviceKind),
    #[error("no {0} found")]
    NotFound(DeviceKind),
    #[error("{kind} unavailable: {detail}")]
    Unavailable { kind: DeviceKind, detail: String },
}

impl DeviceError {
    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceError::PermissionDenied(kind) | DeviceError::NotFound(kind) => *kind,
            DeviceError::Unavailable { kind, .. } => *kind,
        }
    }
}

/// A live capture track. `stop` must be idempotent.
pub trait MediaStream: Send + Sync {
    fn is_active(&self) -> bool;
    fn stop(&self);
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn request_camera(&self) -> Result<Arc<dyn MediaStream>, DeviceError>;
    async fn request_microphone(&self) -> Result<Arc<dyn MediaStream>, DeviceError>;
}

type StreamSlot = Mutex<Option<Arc<dyn MediaStream>>>;

/// Streams acquired during setup and reused by the exam.
///
/// Each device is requested at most once while its stream stays active. Everything is
/// stopped on `release` and again on drop.
pub struct MediaSession {
    devices: Arc<dyn MediaDevices>,
    camera: StreamSlot,
    microphone: StreamSlot,
}

impl MediaSession {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self { devices, camera: Mutex::new(None), microphone: Mutex::new(None) }
    }

    pub async fn camera(&self) -> Result<Arc<dyn MediaStream>, DeviceError> {
        self.acquire(DeviceKind::Camera, &self.camera).await
    }

    pub async fn microphone(&self) -> Result<Arc<dyn MediaStream>, DeviceError> {
        self.acquire(DeviceKind::Microphone, &self.microphone).await
    }

    async fn acquire(
        &self,
        kind: DeviceKind,
        slot: &StreamSlot,
    ) -> Result<Arc<dyn MediaStream>, DeviceError> {
        let mut guard = slot.lock().await;
        if let Some(stream) = guard.as_ref().filter(|stream| stream.is_active()) {
            return Ok(stream.clone());
        }

        let stream = match kind {
            DeviceKind::Camera => self.devices.request_camera().await?,
            DeviceKind::Microphone => self.devices.request_microphone().await?,
            DeviceKind::Speaker => {
                return Err(DeviceError::Unavailable {
                    kind,
                    detail: "speakers are not captured".to_string(),
                })
            }
        };
        tracing::debug!(device = %kind, "Media stream acquired");
        *guard = Some(stream.clone());
        Ok(stream)
    }

    pub async fn release(&self) {
        for slot in [&self.camera, &self.microphone] {
            if let Some(stream) = slot.lock().await.take() {
                stream.stop();
            }
        }
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        for slot in [self.camera.get_mut(), self.microphone.get_mut()] {
            if let Some(stream) = slot.take() {
                stream.stop();
            }
        }
    }
}
