//! Signaling envelope definitions and wire codec.
//!
//! Envelopes are JSON objects relayed verbatim between the two peers:
//!
//! ```json
//! { "type": "offer", "targetUserId": "bob", "callType": "video",
//!   "data": { "offer": { "type": "offer", "sdp": "v=0..." } } }
//! ```
//!
//! The relay adds `fromUserId` on delivery.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::EnvelopeError;
use super::transport::{IceCandidate, SessionDescription};

/// Signaling message types for call control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalingType {
    /// SDP offer from the caller.
    Offer,
    /// SDP answer from the callee.
    Answer,
    /// A single trickled ICE candidate.
    IceCandidate,
    /// Call ended / terminated. Can be sent by either party at any time.
    CallEnd,
}

impl SignalingType {
    /// Get the `type` value used on the wire.
    pub const fn tag_name(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
            Self::CallEnd => "call-end",
        }
    }

    /// Parse from the wire `type` value (case-insensitive).
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_lowercase().as_str() {
            "offer" => Some(Self::Offer),
            "answer" => Some(Self::Answer),
            "ice-candidate" => Some(Self::IceCandidate),
            "call-end" => Some(Self::CallEnd),
            _ => None,
        }
    }
}

impl fmt::Display for SignalingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag_name().to_uppercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    #[default]
    Audio,
    Video,
}

impl CallType {
    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video)
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Audio => "audio",
            Self::Video => "video",
        })
    }
}

/// Typed envelope payload. Exactly one variant per [`SignalingType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingPayload {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    CallEnd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingEnvelope {
    pub target_user_id: String,
    /// Set by the relay on inbound delivery.
    pub from_user_id: Option<String>,
    pub call_type: CallType,
    pub payload: SignalingPayload,
}

impl SignalingEnvelope {
    pub fn new(
        target_user_id: impl Into<String>,
        call_type: CallType,
        payload: SignalingPayload,
    ) -> Self {
        Self {
            target_user_id: target_user_id.into(),
            from_user_id: None,
            call_type,
            payload,
        }
    }

    pub fn offer(
        target: impl Into<String>,
        call_type: CallType,
        offer: SessionDescription,
    ) -> Self {
        Self::new(target, call_type, SignalingPayload::Offer(offer))
    }

    pub fn answer(
        target: impl Into<String>,
        call_type: CallType,
        answer: SessionDescription,
    ) -> Self {
        Self::new(target, call_type, SignalingPayload::Answer(answer))
    }

    pub fn candidate(
        target: impl Into<String>,
        call_type: CallType,
        candidate: IceCandidate,
    ) -> Self {
        Self::new(target, call_type, SignalingPayload::IceCandidate(candidate))
    }

    pub fn call_end(target: impl Into<String>, call_type: CallType) -> Self {
        Self::new(target, call_type, SignalingPayload::CallEnd)
    }

    pub fn from_user(mut self, from_user_id: impl Into<String>) -> Self {
        self.from_user_id = Some(from_user_id.into());
        self
    }

    pub fn signaling_type(&self) -> SignalingType {
        match self.payload {
            SignalingPayload::Offer(_) => SignalingType::Offer,
            SignalingPayload::Answer(_) => SignalingType::Answer,
            SignalingPayload::IceCandidate(_) => SignalingType::IceCandidate,
            SignalingPayload::CallEnd => SignalingType::CallEnd,
        }
    }

    /// Whether this envelope was sent by `peer`. Envelopes without a sender
    /// never match.
    pub fn is_from(&self, peer: &str) -> bool {
        self.from_user_id.as_deref() == Some(peer)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&WireEnvelope::from(self))
    }

    /// Parse an inbound frame.
    pub fn from_json(text: &str) -> Result<Self, EnvelopeError> {
        let wire: WireEnvelope = serde_json::from_str(text)?;
        Self::try_from(wire)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    #[serde(rename = "type")]
    signaling_type: String,
    target_user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from_user_id: Option<String>,
    #[serde(default)]
    call_type: CallType,
    #[serde(default)]
    data: WireData,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    answer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    candidate: Option<IceCandidate>,
}

impl From<&SignalingEnvelope> for WireEnvelope {
    fn from(env: &SignalingEnvelope) -> Self {
        let mut data = WireData::default();
        match &env.payload {
            SignalingPayload::Offer(offer) => data.offer = Some(offer.clone()),
            SignalingPayload::Answer(answer) => data.answer = Some(answer.clone()),
            SignalingPayload::IceCandidate(candidate) => data.candidate = Some(candidate.clone()),
            SignalingPayload::CallEnd => {}
        }
        Self {
            signaling_type: env.signaling_type().tag_name().to_string(),
            target_user_id: env.target_user_id.clone(),
            from_user_id: env.from_user_id.clone(),
            call_type: env.call_type,
            data,
        }
    }
}

impl TryFrom<WireEnvelope> for SignalingEnvelope {
    type Error = EnvelopeError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let signaling_type = SignalingType::from_tag(&wire.signaling_type)
            .ok_or_else(|| EnvelopeError::UnknownType(wire.signaling_type.clone()))?;

        let payload = match signaling_type {
            SignalingType::Offer => SignalingPayload::Offer(
                wire.data.offer.ok_or(EnvelopeError::MissingPayload("offer"))?,
            ),
            SignalingType::Answer => SignalingPayload::Answer(
                wire.data.answer.ok_or(EnvelopeError::MissingPayload("answer"))?,
            ),
            SignalingType::IceCandidate => SignalingPayload::IceCandidate(
                wire.data
                    .candidate
                    .ok_or(EnvelopeError::MissingPayload("candidate"))?,
            ),
            SignalingType::CallEnd => SignalingPayload::CallEnd,
        };

        Ok(Self {
            target_user_id: wire.target_user_id,
            from_user_id: wire.from_user_id,
            call_type: wire.call_type,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signaling_type_tags() {
        assert_eq!(SignalingType::from_tag("offer"), Some(SignalingType::Offer));
        assert_eq!(SignalingType::CallEnd.tag_name(), "call-end");
        assert_eq!(
            SignalingType::from_tag("ICE-CANDIDATE"),
            Some(SignalingType::IceCandidate)
        );
        assert!(SignalingType::from_tag("terminate").is_none());
    }

    #[test]
    fn test_offer_wire_shape() {
        let env = SignalingEnvelope::offer(
            "bob",
            CallType::Video,
            SessionDescription::offer("v=0\r\n"),
        );
        let value: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "offer",
                "targetUserId": "bob",
                "callType": "video",
                "data": { "offer": { "type": "offer", "sdp": "v=0\r\n" } }
            })
        );
    }

    #[test]
    fn test_call_end_wire_shape_has_empty_data() {
        let env = SignalingEnvelope::call_end("bob", CallType::Audio);
        let value: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "call-end");
        assert_eq!(value["data"], json!({}));
        assert!(value.get("fromUserId").is_none());
    }

    #[test]
    fn test_parse_inbound_candidate() {
        let text = json!({
            "type": "ice-candidate",
            "targetUserId": "alice",
            "fromUserId": "bob",
            "callType": "audio",
            "data": {
                "candidate": {
                    "candidate": "candidate:1 1 udp 1 10.0.0.1 9 typ host",
                    "sdpMid": "0"
                }
            }
        })
        .to_string();

        let env = SignalingEnvelope::from_json(&text).unwrap();
        assert_eq!(env.signaling_type(), SignalingType::IceCandidate);
        assert!(env.is_from("bob"));
        assert!(!env.is_from("mallory"));
        match env.payload {
            SignalingPayload::IceCandidate(c) => assert_eq!(c.sdp_mid.as_deref(), Some("0")),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_malformed_frames() {
        assert!(matches!(
            SignalingEnvelope::from_json("not json"),
            Err(EnvelopeError::Json(_))
        ));
        let unknown = r#"{"type":"ring","targetUserId":"a","callType":"audio"}"#;
        assert!(matches!(
            SignalingEnvelope::from_json(unknown),
            Err(EnvelopeError::UnknownType(t)) if t == "ring"
        ));
        let empty_answer = r#"{"type":"answer","targetUserId":"a","callType":"audio","data":{}}"#;
        assert!(matches!(
            SignalingEnvelope::from_json(empty_answer),
            Err(EnvelopeError::MissingPayload("answer"))
        ));
    }

    #[test]
    fn test_call_end_without_call_type_defaults_to_audio() {
        let text = r#"{"type":"call-end","targetUserId":"a","fromUserId":"b"}"#;
        let env = SignalingEnvelope::from_json(text).unwrap();
        assert_eq!(env.payload, SignalingPayload::CallEnd);
        assert_eq!(env.call_type, CallType::Audio);
    }
}
