//! Local media capture.
//!
//! [`DeviceMediaCapture`] opens the microphone (always) and the camera (video
//! calls only) through a platform [`CaptureBackend`], classifies device
//! failures into [`MediaError`] kinds, and hands the live tracks to the session
//! inside a [`LocalMediaHandle`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::calls::error::MediaError;
use crate::config::MediaConstraints;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Audio => "audio",
            Self::Video => "video",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoResolution {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// A live capture track.
pub trait CaptureTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    /// Stop capturing. Must tolerate repeated calls.
    fn stop(&self);
}

/// Reason a platform refused to open a capture device.
///
/// The variants follow the platform denial reasons media stacks report
/// (`NotAllowedError`, `NotFoundError`, `NotReadableError`,
/// `OverconstrainedError`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFailure {
    NotAllowed(String),
    NotFound(String),
    NotReadable(String),
    Overconstrained(String),
    Other(String),
}

impl From<DeviceFailure> for MediaError {
    fn from(failure: DeviceFailure) -> Self {
        match failure {
            DeviceFailure::NotAllowed(m) => MediaError::PermissionDenied(m),
            DeviceFailure::NotFound(m) => MediaError::DeviceNotFound(m),
            DeviceFailure::NotReadable(m) => MediaError::DeviceBusy(m),
            DeviceFailure::Overconstrained(m) | DeviceFailure::Other(m) => MediaError::Unknown(m),
        }
    }
}

/// Platform access to capture devices.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn open_audio(&self) -> Result<Arc<dyn CaptureTrack>, DeviceFailure>;

    /// Open the camera. `None` requests the device default resolution.
    async fn open_video(
        &self,
        resolution: Option<VideoResolution>,
    ) -> Result<Arc<dyn CaptureTrack>, DeviceFailure>;
}

/// Acquires and releases local media for a call.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Acquire audio, plus video when `video` is set. On failure every track
    /// opened so far has already been stopped.
    async fn acquire(&self, video: bool) -> Result<LocalMediaHandle, MediaError>;

    /// Stop every track in `handle`. Repeated calls are no-ops.
    fn release(&self, handle: &LocalMediaHandle) {
        handle.release();
    }
}

/// Local capture tracks exclusively owned by one call session.
pub struct LocalMediaHandle {
    tracks: Vec<Arc<dyn CaptureTrack>>,
    released: AtomicBool,
}

impl LocalMediaHandle {
    pub fn new(tracks: Vec<Arc<dyn CaptureTrack>>) -> Self {
        Self {
            tracks,
            released: AtomicBool::new(false),
        }
    }

    pub fn tracks(&self) -> &[Arc<dyn CaptureTrack>] {
        &self.tracks
    }

    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind() == TrackKind::Video)
    }

    /// Flip the enabled flag of every track of `kind`. Returns the new state,
    /// or `None` when no such track exists or the handle is released.
    pub fn toggle(&self, kind: TrackKind) -> Option<bool> {
        if self.is_released() {
            return None;
        }
        let mut matching = self.tracks.iter().filter(|t| t.kind() == kind).peekable();
        let enabled = !matching.peek()?.is_enabled();
        for track in matching {
            track.set_enabled(enabled);
        }
        Some(enabled)
    }

    /// Stop all tracks. Returns `false` if the handle was already released.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        for track in &self.tracks {
            track.stop();
        }
        debug!("Released {} local track(s)", self.tracks.len());
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for LocalMediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMediaHandle")
            .field(
                "tracks",
                &self
                    .tracks
                    .iter()
                    .map(|t| (t.id().to_string(), t.kind()))
                    .collect::<Vec<_>>(),
            )
            .field("released", &self.is_released())
            .finish()
    }
}

/// [`MediaCapture`] over a platform [`CaptureBackend`].
pub struct DeviceMediaCapture<B> {
    backend: B,
    constraints: MediaConstraints,
}

impl<B: CaptureBackend> DeviceMediaCapture<B> {
    pub fn new(backend: B, constraints: MediaConstraints) -> Self {
        Self {
            backend,
            constraints,
        }
    }

    async fn open_camera(&self) -> Result<Arc<dyn CaptureTrack>, DeviceFailure> {
        let preferred = self.constraints.preferred_resolution();
        match self.backend.open_video(Some(preferred)).await {
            Err(DeviceFailure::Overconstrained(reason)) => {
                warn!(
                    "Camera rejected {}x{}@{} ({reason}), retrying at device default",
                    preferred.width, preferred.height, preferred.frame_rate
                );
                self.backend.open_video(None).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl<B: CaptureBackend> MediaCapture for DeviceMediaCapture<B> {
    async fn acquire(&self, video: bool) -> Result<LocalMediaHandle, MediaError> {
        let audio = self.backend.open_audio().await.map_err(|f| {
            warn!("Microphone unavailable: {:?}", f);
            MediaError::from(f)
        })?;

        let mut tracks = vec![audio];
        if video {
            match self.open_camera().await {
                Ok(camera) => tracks.push(camera),
                Err(failure) => {
                    // Audio without video is not a usable video call.
                    warn!("Camera unavailable: {:?}", failure);
                    LocalMediaHandle::new(tracks).release();
                    return Err(failure.into());
                }
            }
        }

        info!(
            "Acquired local media ({} track(s), video: {video})",
            tracks.len()
        );
        Ok(LocalMediaHandle::new(tracks))
    }
}

/// A capture track whose lifecycle is tracked with flags only.
///
/// Backends that push frames from elsewhere (or produce none) use this as
/// their track type.
pub struct DeviceTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl DeviceTrack {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            id: format!("{kind}-{:08x}", rand::random::<u32>()),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl CaptureTrack for DeviceTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Backend that grants placeholder devices; used by the demo binary for
/// headless runs where only signaling and negotiation are exercised.
#[derive(Debug, Default)]
pub struct SyntheticCaptureBackend;

#[async_trait]
impl CaptureBackend for SyntheticCaptureBackend {
    async fn open_audio(&self) -> Result<Arc<dyn CaptureTrack>, DeviceFailure> {
        Ok(Arc::new(DeviceTrack::new(TrackKind::Audio)))
    }

    async fn open_video(
        &self,
        _resolution: Option<VideoResolution>,
    ) -> Result<Arc<dyn CaptureTrack>, DeviceFailure> {
        Ok(Arc::new(DeviceTrack::new(TrackKind::Video)))
    }
}
