//! Peer transport negotiation contract.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::capture::LocalMediaHandle;
use super::remote::RemoteTrack;
use crate::calls::error::NegotiationError;
use crate::calls::transport::{IceCandidate, SessionDescription};

/// Observable connection state of the peer transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    /// Whether the media path is gone. No reconnection is attempted.
    pub fn is_lost(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An event produced by a peer transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A locally gathered candidate, to be forwarded to the peer immediately.
    LocalCandidate(IceCandidate),
    /// An inbound media track.
    RemoteTrack(RemoteTrack),
    StateChanged(TransportState),
}

/// Owns offer/answer/candidate negotiation and the resulting media path.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Attach the local tracks that will be sent to the peer.
    async fn add_local_media(&self, media: &LocalMediaHandle) -> Result<(), NegotiationError>;

    /// Caller flow, step one.
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    /// Caller flow, step two.
    async fn set_remote_answer(&self, answer: SessionDescription) -> Result<(), NegotiationError>;

    /// Callee flow: apply the remote offer and produce the local answer.
    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError>;

    /// Apply a remote candidate. Out-of-order, early, and duplicate candidates
    /// are accepted; this never fails.
    async fn add_remote_candidate(&self, candidate: IceCandidate);

    /// Release all negotiation and transport state. Idempotent.
    async fn close(&self);
}

/// A transport together with the stream of events it produces.
pub type TransportPair = (Arc<dyn PeerTransport>, mpsc::UnboundedReceiver<TransportEvent>);

/// A factory responsible for creating new peer transports.
#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    /// Creates a new transport and returns it, along with its event stream.
    async fn create_transport(&self) -> Result<TransportPair, NegotiationError>;
}
