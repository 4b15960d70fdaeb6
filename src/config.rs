//! Configuration for call sessions and their collaborators.
//!
//! Every struct deserializes from camelCase JSON with all fields except the
//! user ids optional, so a host only spells out what it overrides:
//!
//! ```json
//! {
//!   "signaling": { "relayUrl": "wss://relay.example/ws" },
//!   "webrtc": { "iceServers": ["stun:stun.example:3478"] },
//!   "media": { "preferredWidth": 640, "preferredHeight": 480 }
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::calls::media::VideoResolution;
use crate::calls::CallType;

/// Signaling connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

fn duration_from_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

/// Which side of the offer/answer exchange this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallRole {
    /// Creates and sends the offer.
    #[default]
    Caller,
    /// Waits for the offer and answers it.
    Callee,
}

/// Identity and role of one call session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSessionConfig {
    pub local_user_id: String,
    pub remote_user_id: String,
    #[serde(default)]
    pub call_type: CallType,
    #[serde(default)]
    pub role: CallRole,
    /// Upper bound on opening the signaling channel.
    #[serde(
        rename = "connectTimeoutMs",
        default = "default_connect_timeout",
        deserialize_with = "duration_from_millis"
    )]
    pub connect_timeout: Duration,
}

impl CallSessionConfig {
    pub fn new(
        local_user_id: impl Into<String>,
        remote_user_id: impl Into<String>,
        call_type: CallType,
        role: CallRole,
    ) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            remote_user_id: remote_user_id.into(),
            call_type,
            role,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn caller(
        local_user_id: impl Into<String>,
        remote_user_id: impl Into<String>,
        call_type: CallType,
    ) -> Self {
        Self::new(local_user_id, remote_user_id, call_type, CallRole::Caller)
    }

    pub fn callee(
        local_user_id: impl Into<String>,
        remote_user_id: impl Into<String>,
        call_type: CallType,
    ) -> Self {
        Self::new(local_user_id, remote_user_id, call_type, CallRole::Callee)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignalingConfig {
    /// Base URL of the relay; the local user id is appended as a path segment.
    pub relay_url: String,
    #[serde(rename = "connectTimeoutMs", deserialize_with = "duration_from_millis")]
    pub connect_timeout: Duration,
}

impl SignalingConfig {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            ..Default::default()
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:8080/ws".to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebRtcConfig {
    /// STUN/TURN URLs. Empty means host candidates only.
    pub ice_servers: Vec<String>,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
        }
    }
}

/// Capture preferences. Applied to the camera only when video is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaConstraints {
    pub preferred_width: u32,
    pub preferred_height: u32,
    pub preferred_frame_rate: u32,
}

impl MediaConstraints {
    pub fn preferred_resolution(&self) -> VideoResolution {
        VideoResolution {
            width: self.preferred_width,
            height: self.preferred_height,
            frame_rate: self.preferred_frame_rate,
        }
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            preferred_width: 1280,
            preferred_height: 720,
            preferred_frame_rate: 30,
        }
    }
}

/// Process-level configuration shared by every call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PeerCallConfig {
    pub signaling: SignalingConfig,
    pub webrtc: WebRtcConfig,
    pub media: MediaConstraints,
}

impl PeerCallConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
