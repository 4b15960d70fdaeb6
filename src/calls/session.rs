//! Call session orchestration.
//!
//! A [`CallSession`] composes media capture, a signaling channel and a peer
//! transport into one call lifecycle. It runs as a single event loop: UI
//! commands, signaling events and transport events are pulled one at a time
//! and each is handled to completion before the next, so session state needs
//! no locking.
//!
//! Teardown always runs in the same order: transport close, media release,
//! channel close. `on_call_end` fires exactly once per session, whichever
//! terminal path is taken.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};

use super::channel::{ChannelEvent, SignalingChannel};
use super::error::{CallError, ErrorKind, SignalingError};
use super::media::{
    LocalMediaHandle, MediaCapture, PeerTransport, PeerTransportFactory, RemoteMediaHandle,
    TrackKind, TransportEvent, TransportState,
};
use super::registry::{SessionClaim, SessionRegistry};
use super::signaling::{SignalingEnvelope, SignalingPayload};
use super::state::{CallState, CallTransition};
use super::transport::{IceCandidate, SessionDescription};
use crate::config::{CallRole, CallSessionConfig};

/// Lifecycle callbacks delivered to the UI layer.
///
/// Callbacks run on the session's event loop and must not block.
pub trait CallObserver: Send + Sync {
    /// The remote stream exists. Fires once, when the first remote track
    /// arrives; later tracks are appended to the same handle.
    fn on_remote_stream(&self, remote: RemoteMediaHandle);

    /// The session reached `Ended` or `Failed`. Fires exactly once.
    fn on_call_end(&self);

    /// The session failed. `kind` names one of the [`ErrorKind`] variants.
    fn on_error(&self, kind: ErrorKind, message: &str);

    fn on_state_changed(&self, _state: &CallState) {}
}

enum Command {
    Hangup,
    Toggle(TrackKind, oneshot::Sender<Option<bool>>),
}

/// Cloneable handle for acting on a session whose event loop runs elsewhere.
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl CallHandle {
    /// Queue a hangup. Returns `false` if the session is gone.
    pub fn hangup(&self) -> bool {
        self.commands.send(Command::Hangup).is_ok()
    }

    /// Flip the local audio track; returns the new enabled state.
    pub async fn toggle_audio(&self) -> Option<bool> {
        self.toggle(TrackKind::Audio).await
    }

    /// Flip the local video track; returns the new enabled state.
    pub async fn toggle_video(&self) -> Option<bool> {
        self.toggle(TrackKind::Video).await
    }

    async fn toggle(&self, kind: TrackKind) -> Option<bool> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Toggle(kind, tx)).ok()?;
        rx.await.ok().flatten()
    }
}

enum SessionEvent {
    Command(Command),
    Channel(ChannelEvent),
    Transport(TransportEvent),
}

/// Why a session is ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndCause {
    LocalHangup,
    RemoteHangup,
    TransportLost,
}

pub struct CallSession {
    config: CallSessionConfig,
    state: CallState,
    observer: Arc<dyn CallObserver>,
    registry: Arc<SessionRegistry>,
    claim: Option<SessionClaim>,

    capture: Arc<dyn MediaCapture>,
    channel: Option<Arc<dyn SignalingChannel>>,
    transport_factory: Arc<dyn PeerTransportFactory>,
    media: Option<LocalMediaHandle>,
    transport: Option<Arc<dyn PeerTransport>>,
    remote: RemoteMediaHandle,
    remote_announced: bool,

    open_attempted: bool,
    remote_description_applied: bool,
    end_notified: bool,

    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    channel_events: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    transport_events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl CallSession {
    pub fn new(
        config: CallSessionConfig,
        capture: Arc<dyn MediaCapture>,
        channel: Arc<dyn SignalingChannel>,
        transport_factory: Arc<dyn PeerTransportFactory>,
        observer: Arc<dyn CallObserver>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        Self {
            config,
            state: CallState::Idle,
            observer,
            registry: SessionRegistry::global(),
            claim: None,
            capture,
            channel: Some(channel),
            transport_factory,
            media: None,
            transport: None,
            remote: RemoteMediaHandle::new(),
            remote_announced: false,
            open_attempted: false,
            remote_description_applied: false,
            end_notified: false,
            commands_tx,
            commands_rx,
            channel_events: None,
            transport_events: None,
        }
    }

    /// Enforce the one-session-per-identity rule against `registry` instead of
    /// the process-wide one.
    pub fn with_registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &CallSessionConfig {
        &self.config
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// The remote stream, once its first track has arrived.
    pub fn remote_media(&self) -> Option<RemoteMediaHandle> {
        self.remote_announced.then(|| self.remote.clone())
    }

    pub fn local_media(&self) -> Option<&LocalMediaHandle> {
        self.media.as_ref()
    }

    pub fn handle(&self) -> CallHandle {
        CallHandle {
            commands: self.commands_tx.clone(),
        }
    }

    /// Acquire media, open signaling and start negotiating.
    ///
    /// On success the session is `Negotiating`: the caller has sent its
    /// offer, the callee is waiting for one. Failures move the session to
    /// `Failed` (with `on_error` and `on_call_end` already delivered) and are
    /// also returned.
    ///
    /// A session starts at most once. Calling this outside `Idle` returns an
    /// error and leaves the session and its observer untouched.
    pub async fn start(&mut self) -> Result<(), CallError> {
        if !matches!(self.state, CallState::Idle) {
            warn!("start() rejected in state {}", self.state);
            return Err(CallError::new(
                ErrorKind::Unknown,
                format!("session already started (state {})", self.state.name()),
            ));
        }

        let claim = match self.registry.claim(&self.config.local_user_id) {
            Ok(claim) => claim,
            Err(e) => return Err(self.fail(e).await),
        };
        self.claim = Some(claim);
        info!(
            "Starting {} call {} -> {} as {:?}",
            self.config.call_type,
            self.config.local_user_id,
            self.config.remote_user_id,
            self.config.role
        );

        self.transition(CallTransition::Start);
        let media = match self.capture.acquire(self.config.call_type.is_video()).await {
            Ok(media) => media,
            Err(e) => return Err(self.fail(e.into()).await),
        };
        self.media = Some(media);

        self.transition(CallTransition::MediaAcquired);
        self.open_signaling().await?;

        self.transition(CallTransition::SignalingConnected);
        self.prepare_transport().await?;

        if self.config.role == CallRole::Caller {
            self.send_offer().await?;
        } else {
            debug!("Waiting for offer from {}", self.config.remote_user_id);
        }
        Ok(())
    }

    /// Handle the next pending event. Returns `false` once the session is
    /// terminal.
    pub async fn step(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        let event = self.next_event().await;
        self.handle_event(event).await;
        !self.state.is_terminal()
    }

    /// Drive the session until it ends.
    pub async fn run(&mut self) -> CallState {
        while self.step().await {}
        self.state.clone()
    }

    /// Hang up. Allowed from any non-terminal state; a no-op once the session
    /// is ending or over.
    pub async fn hangup(&mut self) {
        if !self.state.can_end() {
            debug!("hangup() ignored in state {}", self.state);
            return;
        }
        self.end(EndCause::LocalHangup).await;
    }

    /// Flip the local audio track. `None` when no local media is held.
    pub fn toggle_audio(&self) -> Option<bool> {
        self.toggle(TrackKind::Audio)
    }

    /// Flip the local video track. `None` when no camera is held.
    pub fn toggle_video(&self) -> Option<bool> {
        self.toggle(TrackKind::Video)
    }

    fn toggle(&self, kind: TrackKind) -> Option<bool> {
        if self.state.is_terminal() {
            return None;
        }
        let enabled = self.media.as_ref()?.toggle(kind)?;
        info!("Local {kind} {}", if enabled { "enabled" } else { "disabled" });
        Some(enabled)
    }

    async fn next_event(&mut self) -> SessionEvent {
        loop {
            // With both streams gone nothing can move the call forward again.
            if self.transport.is_some()
                && self.channel_events.is_none()
                && self.transport_events.is_none()
            {
                debug!("Signaling and transport streams both ended");
                return SessionEvent::Transport(TransportEvent::StateChanged(
                    TransportState::Closed,
                ));
            }
            tokio::select! {
                biased;
                Some(command) = self.commands_rx.recv() => return SessionEvent::Command(command),
                event = recv_or_pending(&mut self.channel_events) => match event {
                    Some(event) => return SessionEvent::Channel(event),
                    None => {
                        self.channel_events = None;
                        return SessionEvent::Channel(ChannelEvent::Closed);
                    }
                },
                event = recv_or_pending(&mut self.transport_events) => match event {
                    Some(event) => return SessionEvent::Transport(event),
                    None => {
                        debug!("Transport event stream ended");
                        self.transport_events = None;
                    }
                },
            }
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Command(Command::Hangup) => self.hangup().await,
            SessionEvent::Command(Command::Toggle(kind, reply)) => {
                let _ = reply.send(self.toggle(kind));
            }
            SessionEvent::Channel(ChannelEvent::Envelope(envelope)) => {
                self.handle_envelope(envelope).await
            }
            SessionEvent::Channel(ChannelEvent::Closed) => self.handle_channel_closed().await,
            SessionEvent::Transport(event) => self.handle_transport_event(event).await,
        }
    }

    async fn handle_envelope(&mut self, envelope: SignalingEnvelope) {
        if !envelope.is_from(&self.config.remote_user_id) {
            debug!(
                "Dropping {} from {:?}, not part of this call",
                envelope.signaling_type(),
                envelope.from_user_id
            );
            return;
        }
        if !matches!(self.state, CallState::Negotiating | CallState::Active { .. }) {
            debug!(
                "Ignoring {} in state {}",
                envelope.signaling_type(),
                self.state
            );
            return;
        }

        match envelope.payload {
            SignalingPayload::Offer(offer) => self.handle_offer(offer).await,
            SignalingPayload::Answer(answer) => self.handle_answer(answer).await,
            SignalingPayload::IceCandidate(candidate) => {
                if let Some(transport) = &self.transport {
                    transport.add_remote_candidate(candidate).await;
                }
            }
            SignalingPayload::CallEnd => {
                info!("Remote peer {} ended the call", self.config.remote_user_id);
                self.end(EndCause::RemoteHangup).await;
            }
        }
    }

    async fn handle_offer(&mut self, offer: SessionDescription) {
        if self.config.role != CallRole::Callee || self.remote_description_applied {
            warn!("Unexpected offer from {}", self.config.remote_user_id);
            return;
        }
        let Some(transport) = self.transport.clone() else {
            return;
        };
        let answer = match transport.accept_offer(offer).await {
            Ok(answer) => answer,
            Err(e) => {
                self.fail(e.into()).await;
                return;
            }
        };
        self.remote_description_applied = true;

        let envelope = SignalingEnvelope::answer(
            &self.config.remote_user_id,
            self.config.call_type,
            answer,
        );
        if let Err(e) = self.send(&envelope) {
            self.fail(e.into()).await;
        }
    }

    async fn handle_answer(&mut self, answer: SessionDescription) {
        if self.config.role != CallRole::Caller || self.remote_description_applied {
            warn!("Unexpected answer from {}", self.config.remote_user_id);
            return;
        }
        let Some(transport) = self.transport.clone() else {
            return;
        };
        match transport.set_remote_answer(answer).await {
            Ok(()) => self.remote_description_applied = true,
            Err(e) => {
                self.fail(e.into()).await;
            }
        }
    }

    async fn handle_channel_closed(&mut self) {
        self.channel_events = None;
        match self.state {
            CallState::Negotiating => {
                self.fail(CallError::new(
                    ErrorKind::SignalingUnavailable,
                    "signaling channel closed during negotiation",
                ))
                .await;
            }
            // Media keeps flowing without the relay; only the end notification
            // is lost.
            _ => warn!("Signaling channel closed in state {}", self.state),
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        if self.state.is_terminal() {
            return;
        }
        match event {
            TransportEvent::LocalCandidate(candidate) => self.forward_candidate(candidate).await,
            TransportEvent::RemoteTrack(track) => {
                debug!("Remote {} track {} received", track.kind, track.id);
                if self.remote.add_track(track) && !self.remote_announced {
                    self.remote_announced = true;
                    self.observer.on_remote_stream(self.remote.clone());
                }
            }
            TransportEvent::StateChanged(state) => self.handle_transport_state(state).await,
        }
    }

    async fn forward_candidate(&mut self, candidate: IceCandidate) {
        let envelope = SignalingEnvelope::candidate(
            &self.config.remote_user_id,
            self.config.call_type,
            candidate,
        );
        match self.send(&envelope) {
            Ok(()) => {}
            Err(e) if matches!(self.state, CallState::Negotiating) => {
                self.fail(e.into()).await;
            }
            Err(e) => debug!("Local candidate not forwarded: {e}"),
        }
    }

    async fn handle_transport_state(&mut self, state: TransportState) {
        let negotiating = matches!(self.state, CallState::Negotiating);
        match state {
            TransportState::Connected if negotiating => {
                self.transition(CallTransition::TransportConnected);
            }
            s if s.is_lost() && negotiating => {
                self.fail(CallError::new(
                    ErrorKind::NegotiationFailed,
                    format!("peer transport {s} before connecting"),
                ))
                .await;
            }
            s if s.is_lost() && self.state.is_active() => {
                warn!("Peer transport {s}, ending call");
                self.end(EndCause::TransportLost).await;
            }
            s => debug!("Transport {s} in state {}", self.state),
        }
    }

    async fn open_signaling(&mut self) -> Result<(), CallError> {
        let Some(channel) = self.channel.clone() else {
            return Err(self
                .fail(CallError::new(
                    ErrorKind::SignalingUnavailable,
                    "no signaling channel",
                ))
                .await);
        };

        self.open_attempted = true;
        let timeout = self.config.connect_timeout;
        let result = tokio::time::timeout(timeout, channel.open(&self.config.local_user_id)).await;
        let error = match result {
            Ok(Ok(events)) => {
                self.channel_events = Some(events);
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(_) => SignalingError::ConnectTimeout,
        };

        let message = match error {
            SignalingError::ConnectTimeout => {
                format!("signaling connect timed out after {}ms", timeout.as_millis())
            }
            other => other.to_string(),
        };
        Err(self
            .fail(CallError::new(ErrorKind::SignalingUnavailable, message))
            .await)
    }

    async fn prepare_transport(&mut self) -> Result<(), CallError> {
        let (transport, events) = match self.transport_factory.create_transport().await {
            Ok(created) => created,
            Err(e) => return Err(self.fail(e.into()).await),
        };
        self.transport = Some(transport.clone());
        self.transport_events = Some(events);

        let attached = match &self.media {
            Some(media) => transport.add_local_media(media).await,
            None => Ok(()),
        };
        if let Err(e) = attached {
            return Err(self.fail(e.into()).await);
        }
        Ok(())
    }

    async fn send_offer(&mut self) -> Result<(), CallError> {
        let Some(transport) = self.transport.clone() else {
            return Ok(());
        };
        let offer = match transport.create_offer().await {
            Ok(offer) => offer,
            Err(e) => return Err(self.fail(e.into()).await),
        };
        let envelope =
            SignalingEnvelope::offer(&self.config.remote_user_id, self.config.call_type, offer);
        if let Err(e) = self.send(&envelope) {
            return Err(self.fail(e.into()).await);
        }
        Ok(())
    }

    fn send(&self, envelope: &SignalingEnvelope) -> Result<(), SignalingError> {
        match &self.channel {
            Some(channel) => channel.send(envelope),
            None => Err(SignalingError::NotConnected),
        }
    }

    async fn end(&mut self, cause: EndCause) {
        if !self.state.can_end() {
            return;
        }
        self.transition(CallTransition::EndRequested);

        if cause != EndCause::RemoteHangup {
            let envelope =
                SignalingEnvelope::call_end(&self.config.remote_user_id, self.config.call_type);
            match self.send(&envelope) {
                Ok(()) => debug!("Sent call-end to {}", self.config.remote_user_id),
                Err(SignalingError::NotConnected) => {
                    debug!("Signaling unavailable, skipping call-end notification")
                }
                Err(e) => warn!("Failed to send call-end: {e}"),
            }
        }

        self.teardown().await;
        self.transition(CallTransition::TeardownComplete);
        info!("Call ended ({cause:?})");
        self.notify_end();
    }

    /// Move to `Failed`, tear everything down, and report. Returns the error
    /// for the caller to propagate.
    async fn fail(&mut self, error: CallError) -> CallError {
        if self.state.is_terminal() {
            return error;
        }
        warn!("Call failed in state {}: {error}", self.state);
        self.teardown().await;
        self.transition(CallTransition::Fail(error.kind));
        self.observer.on_error(error.kind, &error.message);
        self.notify_end();
        error
    }

    async fn teardown(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        self.transport_events = None;

        if let Some(media) = self.media.take() {
            self.capture.release(&media);
        }

        if let Some(channel) = self.channel.take() {
            if self.open_attempted {
                channel.close().await;
            }
        }
        self.channel_events = None;
        self.claim = None;
    }

    fn notify_end(&mut self) {
        if self.end_notified {
            return;
        }
        self.end_notified = true;
        self.observer.on_call_end();
    }

    fn transition(&mut self, transition: CallTransition) {
        let from = self.state.name();
        match self.state.apply_transition(transition) {
            Ok(()) => {
                info!(
                    "Call {} -> {}: {from} -> {}",
                    self.config.local_user_id, self.config.remote_user_id, self.state
                );
                self.observer.on_state_changed(&self.state);
            }
            Err(e) => warn!("{e}"),
        }
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        warn!(
            "Call {} -> {} dropped in state {}, releasing resources",
            self.config.local_user_id, self.config.remote_user_id, self.state
        );

        let transport = self.transport.take();
        if let Some(media) = self.media.take() {
            self.capture.release(&media);
        }
        let channel = self.channel.take().filter(|_| self.open_attempted);

        if transport.is_none() && channel.is_none() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Some(transport) = transport {
                        transport.close().await;
                    }
                    if let Some(channel) = channel {
                        channel.close().await;
                    }
                });
            }
            Err(_) => warn!("No runtime to close the transport and signaling channel on"),
        }
    }
}

async fn recv_or_pending<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
