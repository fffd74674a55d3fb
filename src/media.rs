//! Local media acquisition and track gating.
//!
//! The device manager owns the camera+microphone for the lifetime of one
//! call attempt: a single acquisition attempt at session start and a
//! release on every exit path. The call layer shares the stream handle by
//! reference and only toggles track gates; hardware release always goes
//! through the manager.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::{debug, warn};
use thiserror::Error;
use tokio::sync::Mutex;

use concore::CallError;
use concore::types::call::TrackKind;

/// Capture constraints for one session. The defaults match the Connectly
/// web client: front camera at an ideal 640x480, audio on.
#[derive(Debug, Clone)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub front_camera: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            ideal_width: 640,
            ideal_height: 480,
            front_camera: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
}

impl From<MediaError> for CallError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::PermissionDenied => CallError::PermissionDenied,
            MediaError::DeviceUnavailable(detail) => CallError::DeviceUnavailable(detail),
        }
    }
}

/// A live local capture. Shared by reference; only the manager releases it.
#[derive(Debug)]
pub struct MediaStream {
    id: u64,
    audio_enabled: AtomicBool,
    video_enabled: AtomicBool,
}

impl MediaStream {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            audio_enabled: AtomicBool::new(true),
            video_enabled: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Gate a track without stopping capture, like flipping `track.enabled`
    /// on a browser media track.
    pub fn set_track_enabled(&self, kind: TrackKind, enabled: bool) {
        let flag = match kind {
            TrackKind::Audio => &self.audio_enabled,
            TrackKind::Video => &self.video_enabled,
        };
        flag.store(enabled, Ordering::Relaxed);
    }

    pub fn is_track_enabled(&self, kind: TrackKind) -> bool {
        let flag = match kind {
            TrackKind::Audio => &self.audio_enabled,
            TrackKind::Video => &self.video_enabled,
        };
        flag.load(Ordering::Relaxed)
    }
}

/// Platform capture glue. Production backends live outside this crate.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Single acquisition attempt; the caller decides whether to prompt
    /// the user and try again.
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<Arc<MediaStream>, MediaError>;

    /// Stop capture for `stream`. Idempotent.
    async fn release(&self, stream: &MediaStream);
}

/// Owns acquisition and release of the local camera+microphone.
pub struct MediaDeviceManager {
    backend: Arc<dyn MediaBackend>,
    active: Mutex<Option<Arc<MediaStream>>>,
}

impl MediaDeviceManager {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            active: Mutex::new(None),
        }
    }

    pub async fn acquire(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Arc<MediaStream>, MediaError> {
        let mut active = self.active.lock().await;
        if let Some(stale) = active.take() {
            // A leftover stream means a teardown path was skipped somewhere.
            warn!(target: "Media", "stream {} still active on acquire, releasing it", stale.id());
            self.backend.release(&stale).await;
        }
        let stream = self.backend.acquire(constraints).await?;
        debug!(target: "Media", "acquired stream {}", stream.id());
        *active = Some(stream.clone());
        Ok(stream)
    }

    /// Release the active stream, if any. Called on every session exit path.
    pub async fn release(&self) {
        let stream = self.active.lock().await.take();
        if let Some(stream) = stream {
            debug!(target: "Media", "releasing stream {}", stream.id());
            self.backend.release(&stream).await;
        }
    }

    pub async fn current(&self) -> Option<Arc<MediaStream>> {
        self.active.lock().await.clone()
    }

    /// Gate a track on the active stream. No-op without one.
    pub async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) {
        if let Some(stream) = self.current().await {
            debug!(target: "Media", "{} track -> {}", kind.as_str(), enabled);
            stream.set_track_enabled(kind, enabled);
        }
    }
}
