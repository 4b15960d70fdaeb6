//! WebRTC-based peer transport.
//!
//! Wraps one `RTCPeerConnection` per call. Local candidates are trickled out
//! through [`TransportEvent::LocalCandidate`] as soon as they are gathered;
//! remote candidates that arrive before the remote description are parked and
//! applied once it is set.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::{Mutex, mpsc};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::capture::{LocalMediaHandle, TrackKind};
use super::negotiator::{
    PeerTransport, PeerTransportFactory, TransportEvent, TransportPair, TransportState,
};
use super::remote::RemoteTrack;
use crate::calls::error::NegotiationError;
use crate::calls::transport::{IceCandidate, SdpType, SessionDescription};
use crate::config::WebRtcConfig;

/// Stream id used for every outbound track.
pub const LOCAL_STREAM_ID: &str = "peercall";

/// Creates one [`WebRtcPeerTransport`] per call.
pub struct WebRtcTransportFactory {
    config: WebRtcConfig,
}

impl WebRtcTransportFactory {
    pub fn new(config: WebRtcConfig) -> Self {
        Self { config }
    }

    fn create_api() -> Result<webrtc::api::API, NegotiationError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build())
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.config.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.config.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerTransportFactory for WebRtcTransportFactory {
    async fn create_transport(&self) -> Result<TransportPair, NegotiationError> {
        let api = Self::create_api()?;
        let peer_connection = Arc::new(api.new_peer_connection(self.rtc_configuration()).await?);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let events = events_tx.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("ICE candidate gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        debug!("ICE candidate gathered: {}", init.candidate);
                        let _ = events.send(TransportEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_m_line_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => warn!("Failed to serialize local ICE candidate: {e}"),
                }
            })
        }));

        let events = events_tx.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Audio,
                };
                let remote = RemoteTrack::new(track.id(), track.stream_id(), kind);
                info!("Remote {} track {} arrived", remote.kind, remote.id);
                let _ = events.send(TransportEvent::RemoteTrack(remote));
                Box::pin(async {})
            },
        ));

        let events = events_tx;
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let mapped = match state {
                    RTCPeerConnectionState::Connecting => TransportState::Connecting,
                    RTCPeerConnectionState::Connected => TransportState::Connected,
                    RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
                    RTCPeerConnectionState::Failed => TransportState::Failed,
                    RTCPeerConnectionState::Closed => TransportState::Closed,
                    _ => TransportState::New,
                };
                info!("Peer connection state: {mapped}");
                let _ = events.send(TransportEvent::StateChanged(mapped));
                Box::pin(async {})
            },
        ));

        let transport = WebRtcPeerTransport {
            peer_connection,
            remote_description_set: AtomicBool::new(false),
            pending_candidates: Mutex::new(Vec::new()),
            seen_candidates: std::sync::Mutex::new(HashSet::new()),
            outbound_tracks: std::sync::Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        };
        Ok((Arc::new(transport), events_rx))
    }
}

pub struct WebRtcPeerTransport {
    peer_connection: Arc<RTCPeerConnection>,
    remote_description_set: AtomicBool,
    /// Remote candidates received before the remote description.
    pending_candidates: Mutex<Vec<IceCandidate>>,
    seen_candidates: std::sync::Mutex<HashSet<String>>,
    outbound_tracks: std::sync::Mutex<Vec<(TrackKind, Arc<TrackLocalStaticSample>)>>,
    closed: AtomicBool,
}

impl WebRtcPeerTransport {
    fn has_outbound(&self, kind: TrackKind) -> bool {
        self.outbound_tracks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(k, _)| *k == kind)
    }

    pub async fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.lock().await.len()
    }

    fn ensure_open(&self) -> Result<(), NegotiationError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(NegotiationError::Closed)
        } else {
            Ok(())
        }
    }

    async fn set_remote_description(
        &self,
        desc: RTCSessionDescription,
    ) -> Result<(), NegotiationError> {
        self.peer_connection.set_remote_description(desc).await?;

        let pending = {
            let mut pending = self.pending_candidates.lock().await;
            self.remote_description_set.store(true, Ordering::SeqCst);
            std::mem::take(&mut *pending)
        };
        if !pending.is_empty() {
            debug!("Applying {} early remote candidate(s)", pending.len());
        }
        for candidate in pending {
            self.apply_candidate(candidate).await;
        }
        Ok(())
    }

    async fn apply_candidate(&self, candidate: IceCandidate) {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        if let Err(e) = self.peer_connection.add_ice_candidate(init).await {
            warn!("Ignoring remote ICE candidate: {e}");
        }
    }

    fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
        match kind {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl PeerTransport for WebRtcPeerTransport {
    async fn add_local_media(&self, media: &LocalMediaHandle) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        for track in media.tracks() {
            if self.has_outbound(track.kind()) {
                debug!("Local {} track already attached, skipping", track.kind());
                continue;
            }
            let local = Arc::new(TrackLocalStaticSample::new(
                Self::codec_for(track.kind()),
                track.id().to_owned(),
                LOCAL_STREAM_ID.to_owned(),
            ));
            self.peer_connection
                .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            debug!("Added local {} track {}", track.kind(), track.id());
            self.outbound_tracks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((track.kind(), local));
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.ensure_open()?;
        let offer = self.peer_connection.create_offer(None).await?;
        // Setting the local description starts candidate gathering.
        self.peer_connection
            .set_local_description(offer.clone())
            .await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_remote_answer(&self, answer: SessionDescription) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        if answer.sdp_type != SdpType::Answer {
            return Err(NegotiationError::InvalidDescription(format!(
                "expected answer, got {:?}",
                answer.sdp_type
            )));
        }
        self.set_remote_description(RTCSessionDescription::answer(answer.sdp)?)
            .await
    }

    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        self.ensure_open()?;
        if offer.sdp_type != SdpType::Offer {
            return Err(NegotiationError::InvalidDescription(format!(
                "expected offer, got {:?}",
                offer.sdp_type
            )));
        }
        self.set_remote_description(RTCSessionDescription::offer(offer.sdp)?)
            .await?;

        let answer = self.peer_connection.create_answer(None).await?;
        self.peer_connection
            .set_local_description(answer.clone())
            .await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) {
        if self.closed.load(Ordering::SeqCst) {
            debug!("Transport closed, dropping remote candidate");
            return;
        }
        if candidate.candidate.is_empty() {
            debug!("Remote end-of-candidates received");
            return;
        }
        let fresh = self
            .seen_candidates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(candidate.candidate.clone());
        if !fresh {
            debug!("Duplicate remote candidate ignored");
            return;
        }

        {
            let mut pending = self.pending_candidates.lock().await;
            if !self.remote_description_set.load(Ordering::SeqCst) {
                pending.push(candidate);
                return;
            }
        }
        self.apply_candidate(candidate).await;
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pending_candidates.lock().await.clear();
        if let Err(e) = self.peer_connection.close().await {
            warn!("Error closing peer connection: {e}");
        }
        info!("Peer transport closed");
    }
}
