//! Remote media surfaced to the UI layer.

use std::sync::{Arc, PoisonError, RwLock};

use super::capture::TrackKind;

/// An inbound media track announced by the peer transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, stream_id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            kind,
        }
    }
}

/// The single remote stream of a call session.
///
/// Clones share the same underlying track list; the session appends to it as
/// tracks arrive and the UI reads it.
#[derive(Debug, Clone, Default)]
pub struct RemoteMediaHandle {
    tracks: Arc<RwLock<Vec<RemoteTrack>>>,
}

impl RemoteMediaHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `track` unless a track with the same id is already present.
    pub(crate) fn add_track(&self, track: RemoteTrack) -> bool {
        let mut tracks = self.tracks.write().unwrap_or_else(PoisonError::into_inner);
        if tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        tracks.push(track);
        true
    }

    pub fn tracks(&self) -> Vec<RemoteTrack> {
        self.tracks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.tracks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_video(&self) -> bool {
        self.tracks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|t| t.kind == TrackKind::Video)
    }

    /// Whether both handles refer to the same stream.
    pub fn same_stream(&self, other: &RemoteMediaHandle) -> bool {
        Arc::ptr_eq(&self.tracks, &other.tracks)
    }
}
