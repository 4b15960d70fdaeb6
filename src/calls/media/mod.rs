//! Local and remote media for a call.
//!
//! - [`MediaCapture`] / [`DeviceMediaCapture`]: acquire and release local tracks
//! - [`RemoteMediaHandle`]: inbound tracks shared with the UI
//! - [`PeerTransport`] / [`PeerTransportFactory`]: offer/answer/candidate negotiation
//! - [`WebRtcTransportFactory`]: the negotiator backed by the `webrtc` crate

mod capture;
mod negotiator;
mod remote;
mod webrtc;

pub use capture::{
    CaptureBackend, CaptureTrack, DeviceFailure, DeviceMediaCapture, DeviceTrack,
    LocalMediaHandle, MediaCapture, SyntheticCaptureBackend, TrackKind, VideoResolution,
};
pub use negotiator::{
    PeerTransport, PeerTransportFactory, TransportEvent, TransportPair, TransportState,
};
pub use remote::{RemoteMediaHandle, RemoteTrack};
pub use self::webrtc::{LOCAL_STREAM_ID, WebRtcPeerTransport, WebRtcTransportFactory};
