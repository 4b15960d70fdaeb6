//! Peer-to-peer audio/video call sessions.
//!
//! [`calls::CallSession`] turns "call user X" into an established media
//! session: it acquires local media, opens a signaling channel to a relay,
//! negotiates a peer transport, and tears all three down when the call ends.

pub mod calls;
pub mod config;

pub use calls::{
    CallError, CallHandle, CallObserver, CallSession, CallState, CallType, ErrorKind,
    RemoteMediaHandle,
};
pub use config::{
    CallRole, CallSessionConfig, MediaConstraints, PeerCallConfig, SignalingConfig, WebRtcConfig,
};
