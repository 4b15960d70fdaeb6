//! WebSocket signaling channel.
//!
//! Connects to `{relay_url}/{local_user_id}` and exchanges one JSON envelope
//! per text frame. Outbound envelopes go through an unbounded queue drained by
//! a write pump so `send` never waits on the network.

use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::channel::{ChannelEvent, SignalingChannel};
use super::error::SignalingError;
use super::signaling::SignalingEnvelope;
use crate::config::SignalingConfig;

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

enum ChannelState {
    Idle,
    Connected {
        outbound: mpsc::UnboundedSender<Message>,
        read_pump: JoinHandle<()>,
        write_pump: JoinHandle<()>,
    },
    Closed,
}

pub struct WebSocketSignalingChannel {
    config: SignalingConfig,
    state: Mutex<ChannelState>,
}

impl WebSocketSignalingChannel {
    pub fn new(config: SignalingConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ChannelState::Idle),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.lock_state(), ChannelState::Connected { .. })
    }

    /// Relay endpoint for `local_user_id`.
    pub fn endpoint(&self, local_user_id: &str) -> String {
        format!(
            "{}/{}",
            self.config.relay_url.trim_end_matches('/'),
            urlencoding::encode(local_user_id)
        )
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ChannelState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn write_pump(mut sink: WsSink, mut outbound: mpsc::UnboundedReceiver<Message>) {
        while let Some(msg) = outbound.recv().await {
            if let Err(e) = sink.send(msg).await {
                warn!("Signaling write failed: {e}");
                break;
            }
        }
        let _ = sink.close().await;
        trace!("Signaling write pump finished");
    }

    async fn read_pump(mut stream: WsStream, events: mpsc::UnboundedSender<ChannelEvent>) {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    match SignalingEnvelope::from_json(text.as_str()) {
                        Ok(envelope) => {
                            debug!(
                                "<-- {} from {:?}",
                                envelope.signaling_type(),
                                envelope.from_user_id
                            );
                            if events.send(ChannelEvent::Envelope(envelope)).is_err() {
                                trace!("Signaling event receiver dropped, closing read pump");
                                return;
                            }
                        }
                        Err(e) => warn!("Dropping malformed signaling frame: {e}"),
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    trace!("Received close frame");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Error reading from signaling socket: {e}");
                    break;
                }
                None => {
                    trace!("Signaling stream ended");
                    break;
                }
            }
        }
        let _ = events.send(ChannelEvent::Closed);
    }
}

#[async_trait]
impl SignalingChannel for WebSocketSignalingChannel {
    async fn open(
        &self,
        local_user_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<ChannelEvent>, SignalingError> {
        if !matches!(*self.lock_state(), ChannelState::Idle) {
            return Err(SignalingError::Connect("channel already opened".into()));
        }

        let url = self.endpoint(local_user_id);
        info!("Dialing signaling relay {url}");

        // Dropping the connect future on timeout tears down the half-open socket.
        let connect = tokio_tungstenite::connect_async(url.as_str());
        let (ws, _response) = tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| SignalingError::ConnectTimeout)?
            .map_err(|e| SignalingError::Connect(e.to_string()))?;

        let (sink, stream) = ws.split();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let mut state = self.lock_state();
        if !matches!(*state, ChannelState::Idle) {
            // Closed while the handshake was in flight.
            return Err(SignalingError::Connect("channel closed during connect".into()));
        }
        *state = ChannelState::Connected {
            outbound: outbound_tx,
            read_pump: tokio::spawn(Self::read_pump(stream, events_tx)),
            write_pump: tokio::spawn(Self::write_pump(sink, outbound_rx)),
        };
        info!("Signaling channel connected for {local_user_id}");
        Ok(events_rx)
    }

    fn send(&self, envelope: &SignalingEnvelope) -> Result<(), SignalingError> {
        let state = self.lock_state();
        let ChannelState::Connected { outbound, .. } = &*state else {
            return Err(SignalingError::NotConnected);
        };
        let json = envelope.to_json()?;
        debug!(
            "--> {} to {}",
            envelope.signaling_type(),
            envelope.target_user_id
        );
        outbound
            .send(Message::text(json))
            .map_err(|_| SignalingError::NotConnected)
    }

    async fn close(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), ChannelState::Closed);
        if let ChannelState::Connected {
            outbound,
            read_pump,
            write_pump,
        } = previous
        {
            // A close frame is flushed by the write pump before the sink shuts.
            let _ = outbound.send(Message::Close(None));
            drop(outbound);
            read_pump.abort();
            if tokio::time::timeout(self.config.connect_timeout, write_pump)
                .await
                .is_err()
            {
                debug!("Signaling write pump did not finish before close timeout");
            }
            info!("Signaling channel closed");
        }
    }
}
