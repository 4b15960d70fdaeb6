//! Counting fakes for the session's collaborators.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::channel::{ChannelEvent, SignalingChannel};
use super::error::{ErrorKind, MediaError, NegotiationError, SignalingError};
use super::media::{
    CaptureTrack, DeviceTrack, LocalMediaHandle, MediaCapture, PeerTransport,
    PeerTransportFactory, RemoteMediaHandle, TrackKind, TransportEvent, TransportPair,
};
use super::session::CallObserver;
use super::signaling::SignalingEnvelope;
use super::state::CallState;
use super::transport::{IceCandidate, SessionDescription};

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Monotonic stamp for asserting the order of teardown calls.
fn tick() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    Connect,
    Refuse,
    /// Never completes.
    Hang,
}

pub struct FakeChannel {
    behavior: OpenBehavior,
    inbound: Mutex<Option<mpsc::UnboundedSender<ChannelEvent>>>,
    sent: Mutex<Vec<SignalingEnvelope>>,
    fail_sends: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
    closed_at: AtomicU64,
}

impl FakeChannel {
    pub fn new(behavior: OpenBehavior) -> Self {
        Self {
            behavior,
            inbound: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            closed_at: AtomicU64::new(0),
        }
    }

    /// Make every subsequent `send` fail with `NotConnected`.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn deliver(&self, envelope: SignalingEnvelope) {
        if let Some(tx) = self.inbound.lock().unwrap().as_ref() {
            let _ = tx.send(ChannelEvent::Envelope(envelope));
        }
    }

    pub fn deliver_closed(&self) {
        if let Some(tx) = self.inbound.lock().unwrap().as_ref() {
            let _ = tx.send(ChannelEvent::Closed);
        }
    }

    pub fn sent(&self) -> Vec<SignalingEnvelope> {
        self.sent.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn closed_at(&self) -> Option<u64> {
        Some(self.closed_at.load(Ordering::SeqCst)).filter(|t| *t != 0)
    }
}

#[async_trait]
impl SignalingChannel for FakeChannel {
    async fn open(
        &self,
        _local_user_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<ChannelEvent>, SignalingError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            OpenBehavior::Connect => {
                let (tx, rx) = mpsc::unbounded_channel();
                *self.inbound.lock().unwrap() = Some(tx);
                Ok(rx)
            }
            OpenBehavior::Refuse => Err(SignalingError::Connect("connection refused".into())),
            OpenBehavior::Hang => std::future::pending().await,
        }
    }

    fn send(&self, envelope: &SignalingEnvelope) -> Result<(), SignalingError> {
        if self.fail_sends.load(Ordering::SeqCst) || self.inbound.lock().unwrap().is_none() {
            return Err(SignalingError::NotConnected);
        }
        self.sent.lock().unwrap().push(envelope.clone());
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed_at.store(tick(), Ordering::SeqCst);
        self.inbound.lock().unwrap().take();
    }
}

/// [`MediaCapture`] that grants or denies every request.
pub struct FakeCapture {
    denial: Option<MediaError>,
    tracks: Mutex<Vec<Arc<DeviceTrack>>>,
    acquires: AtomicUsize,
    releases: AtomicUsize,
    released_at: AtomicU64,
}

impl FakeCapture {
    pub fn granting() -> Self {
        Self::with_denial(None)
    }

    pub fn denying(error: MediaError) -> Self {
        Self::with_denial(Some(error))
    }

    fn with_denial(denial: Option<MediaError>) -> Self {
        Self {
            denial,
            tracks: Mutex::new(Vec::new()),
            acquires: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            released_at: AtomicU64::new(0),
        }
    }

    pub fn acquire_count(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    /// Releases that actually stopped tracks.
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn released_at(&self) -> Option<u64> {
        Some(self.released_at.load(Ordering::SeqCst)).filter(|t| *t != 0)
    }

    pub fn all_tracks_stopped(&self) -> bool {
        self.tracks.lock().unwrap().iter().all(|t| t.is_stopped())
    }
}

#[async_trait]
impl MediaCapture for FakeCapture {
    async fn acquire(&self, video: bool) -> Result<LocalMediaHandle, MediaError> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.denial {
            return Err(error.clone());
        }

        let mut kinds = vec![TrackKind::Audio];
        if video {
            kinds.push(TrackKind::Video);
        }
        let mut opened = self.tracks.lock().unwrap();
        let tracks = kinds
            .into_iter()
            .map(|kind| {
                let track = Arc::new(DeviceTrack::new(kind));
                opened.push(track.clone());
                track as Arc<dyn CaptureTrack>
            })
            .collect();
        Ok(LocalMediaHandle::new(tracks))
    }

    fn release(&self, handle: &LocalMediaHandle) {
        if handle.release() {
            self.releases.fetch_add(1, Ordering::SeqCst);
            self.released_at.store(tick(), Ordering::SeqCst);
        }
    }
}

/// Transport that answers every negotiation step with canned SDP.
pub struct FakeTransport {
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    offers: Mutex<Vec<SessionDescription>>,
    answers: Mutex<Vec<SessionDescription>>,
    remote_candidates: Mutex<Vec<IceCandidate>>,
    closes: AtomicUsize,
    closed_at: AtomicU64,
}

impl FakeTransport {
    /// Push an event as if the transport produced it.
    pub fn emit(&self, event: TransportEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Drop the event sender so the session sees the stream end.
    pub fn end_events(&self) {
        self.events.lock().unwrap().take();
    }

    /// Remote offers accepted.
    pub fn offers(&self) -> Vec<SessionDescription> {
        self.offers.lock().unwrap().clone()
    }

    /// Remote answers applied.
    pub fn answers(&self) -> Vec<SessionDescription> {
        self.answers.lock().unwrap().clone()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.remote_candidates.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn closed_at(&self) -> Option<u64> {
        Some(self.closed_at.load(Ordering::SeqCst)).filter(|t| *t != 0)
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn add_local_media(&self, _media: &LocalMediaHandle) -> Result<(), NegotiationError> {
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        Ok(SessionDescription::offer("v=0 fake offer"))
    }

    async fn set_remote_answer(&self, answer: SessionDescription) -> Result<(), NegotiationError> {
        self.answers.lock().unwrap().push(answer);
        Ok(())
    }

    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        self.offers.lock().unwrap().push(offer);
        Ok(SessionDescription::answer("v=0 fake answer"))
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) {
        self.remote_candidates.lock().unwrap().push(candidate);
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed_at.store(tick(), Ordering::SeqCst);
    }
}

/// Hands out one [`FakeTransport`] per factory.
pub struct FakeTransportFactory {
    transport: Arc<FakeTransport>,
    events: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    created: AtomicUsize,
}

impl FakeTransportFactory {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            transport: Arc::new(FakeTransport {
                events: Mutex::new(Some(tx)),
                offers: Mutex::new(Vec::new()),
                answers: Mutex::new(Vec::new()),
                remote_candidates: Mutex::new(Vec::new()),
                closes: AtomicUsize::new(0),
                closed_at: AtomicU64::new(0),
            }),
            events: Mutex::new(Some(rx)),
            created: AtomicUsize::new(0),
        }
    }

    pub fn transport(&self) -> Arc<FakeTransport> {
        self.transport.clone()
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransportFactory for FakeTransportFactory {
    async fn create_transport(&self) -> Result<TransportPair, NegotiationError> {
        let events = self
            .events
            .lock()
            .unwrap()
            .take()
            .ok_or(NegotiationError::Closed)?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok((self.transport.clone(), events))
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    remote_streams: Mutex<Vec<RemoteMediaHandle>>,
    call_ends: AtomicUsize,
    errors: Mutex<Vec<(ErrorKind, String)>>,
    states: Mutex<Vec<CallState>>,
}

impl RecordingObserver {
    pub fn remote_streams(&self) -> Vec<RemoteMediaHandle> {
        self.remote_streams.lock().unwrap().clone()
    }

    pub fn call_end_count(&self) -> usize {
        self.call_ends.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> Vec<(ErrorKind, String)> {
        self.errors.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<CallState> {
        self.states.lock().unwrap().clone()
    }
}

impl CallObserver for RecordingObserver {
    fn on_remote_stream(&self, remote: RemoteMediaHandle) {
        self.remote_streams.lock().unwrap().push(remote);
    }

    fn on_call_end(&self) {
        self.call_ends.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        self.errors.lock().unwrap().push((kind, message.to_string()));
    }

    fn on_state_changed(&self, state: &CallState) {
        self.states.lock().unwrap().push(state.clone());
    }
}
