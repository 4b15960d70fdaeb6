//! Call-related error types.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// The closed set of failure kinds surfaced at the session boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    PermissionDenied,
    DeviceNotFound,
    DeviceBusy,
    ConnectTimeout,
    SignalingUnavailable,
    NotConnected,
    NegotiationFailed,
    SessionAlreadyActive,
    Unknown,
}

/// User-facing message category for an [`ErrorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Permission,
    Hardware,
    Network,
}

impl ErrorKind {
    /// Stable name passed to `CallObserver::on_error`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "PermissionDenied",
            Self::DeviceNotFound => "DeviceNotFound",
            Self::DeviceBusy => "DeviceBusy",
            Self::ConnectTimeout => "ConnectTimeout",
            Self::SignalingUnavailable => "SignalingUnavailable",
            Self::NotConnected => "NotConnected",
            Self::NegotiationFailed => "NegotiationFailed",
            Self::SessionAlreadyActive => "SessionAlreadyActive",
            Self::Unknown => "Unknown",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::PermissionDenied => ErrorCategory::Permission,
            // Unknown only originates from device acquisition; another live
            // session holding the devices reads as hardware being in use.
            Self::DeviceNotFound
            | Self::DeviceBusy
            | Self::SessionAlreadyActive
            | Self::Unknown => ErrorCategory::Hardware,
            Self::ConnectTimeout
            | Self::SignalingUnavailable
            | Self::NotConnected
            | Self::NegotiationFailed => ErrorCategory::Network,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ErrorCategory {
    /// Default human-readable message for the category.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Permission => "Camera or microphone access was denied",
            Self::Hardware => "Camera or microphone is unavailable",
            Self::Network => "Could not connect the call",
        }
    }
}

/// Failures of the signaling channel.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signaling connect timed out")]
    ConnectTimeout,

    #[error("signaling connect failed: {0}")]
    Connect(String),

    #[error("signaling channel not connected")]
    NotConnected,

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SignalingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectTimeout => ErrorKind::ConnectTimeout,
            Self::Connect(_) => ErrorKind::SignalingUnavailable,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::Encode(_) => ErrorKind::Unknown,
        }
    }
}

/// Reasons an inbound frame could not be parsed into an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown envelope type: {0}")]
    UnknownType(String),

    #[error("envelope is missing its {0} payload")]
    MissingPayload(&'static str),
}

/// Failures of local media acquisition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("device busy: {0}")]
    DeviceBusy(String),

    #[error("media capture failed: {0}")]
    Unknown(String),
}

impl MediaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::DeviceNotFound(_) => ErrorKind::DeviceNotFound,
            Self::DeviceBusy(_) => ErrorKind::DeviceBusy,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }
}

/// Failures of peer transport negotiation.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    #[error("peer transport closed")]
    Closed,
}

impl NegotiationError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::NegotiationFailed
    }
}

/// Error surfaced by a [`CallSession`](super::CallSession).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct CallError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CallError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<MediaError> for CallError {
    fn from(e: MediaError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<NegotiationError> for CallError {
    fn from(e: NegotiationError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<SignalingError> for CallError {
    fn from(e: SignalingError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}
