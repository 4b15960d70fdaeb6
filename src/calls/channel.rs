//! Signaling channel contract.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::SignalingError;
use super::signaling::SignalingEnvelope;

/// An event produced by an open signaling channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A well-formed envelope arrived from the relay.
    Envelope(SignalingEnvelope),
    /// The connection was lost or closed by the relay.
    Closed,
}

/// A persistent duplex connection to the signaling relay.
///
/// Implementations must keep `close` idempotent: closing an already-closed or
/// never-opened channel is a no-op.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Open the connection keyed by `local_user_id`.
    ///
    /// Returns the stream of inbound events, in arrival order. Malformed
    /// frames are dropped by the channel and never appear here.
    async fn open(
        &self,
        local_user_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<ChannelEvent>, SignalingError>;

    /// Enqueue an envelope for delivery. Fails with
    /// [`SignalingError::NotConnected`] when the channel is not open; no
    /// buffering or retry happens.
    fn send(&self, envelope: &SignalingEnvelope) -> Result<(), SignalingError>;

    async fn close(&self);
}
