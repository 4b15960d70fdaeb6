//! Peer-to-peer call sessions.
//!
//! A call is driven by a [`CallSession`], which composes three collaborators
//! that fail independently:
//!
//! - [`SignalingChannel`]: duplex connection to the relay carrying
//!   [`SignalingEnvelope`]s (production: [`WebSocketSignalingChannel`])
//! - [`MediaCapture`]: local microphone and camera
//! - [`PeerTransportFactory`]: offer/answer/ICE negotiation and the media path
//!   (production: [`WebRtcTransportFactory`])
//!
//! # Lifecycle
//!
//! `Idle → AcquiringMedia → ConnectingSignaling → Negotiating → Active →
//! Ending → Ended`, with `Failed(reason)` reachable from any non-terminal state. See
//! [`CallState`].

mod channel;
mod error;
pub mod media;
mod registry;
mod session;
mod signaling;
mod state;
mod transport;
mod websocket;

#[cfg(test)]
pub(crate) mod fakes;

pub use channel::{ChannelEvent, SignalingChannel};
pub use error::{
    CallError, EnvelopeError, ErrorCategory, ErrorKind, MediaError, NegotiationError,
    SignalingError,
};
pub use media::{
    DeviceMediaCapture, LocalMediaHandle, MediaCapture, PeerTransport, PeerTransportFactory,
    RemoteMediaHandle, TrackKind, WebRtcTransportFactory,
};
pub use registry::{SessionClaim, SessionRegistry};
pub use session::{CallHandle, CallObserver, CallSession};
pub use signaling::{CallType, SignalingEnvelope, SignalingPayload, SignalingType};
pub use state::{CallState, CallTransition, InvalidTransition};
pub use transport::{IceCandidate, SdpType, SessionDescription};
pub use websocket::WebSocketSignalingChannel;
