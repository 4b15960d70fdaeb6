//! Call session state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::ErrorKind;

/// Current state of a call session.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub enum CallState {
    #[default]
    Idle,
    /// Waiting on local capture devices.
    AcquiringMedia,
    /// Media held, signaling channel opening.
    ConnectingSignaling,
    /// Offer/answer and candidate exchange in progress.
    Negotiating,
    /// Transport connected, media flowing.
    Active { connected_at: DateTime<Utc> },
    /// Tearing down after a hangup or lost transport.
    Ending {
        connected_at: Option<DateTime<Utc>>,
    },
    Ended {
        ended_at: DateTime<Utc>,
        /// Present only when the call reached `Active`.
        duration_secs: Option<i64>,
    },
    Failed {
        reason: ErrorKind,
        ended_at: DateTime<Utc>,
    },
}

impl CallState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn is_ending(&self) -> bool {
        matches!(self, Self::Ending { .. })
    }

    /// `Ended` and `Failed` are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended { .. } | Self::Failed { .. })
    }

    /// Whether an end trigger (hangup, remote call-end, lost transport) still
    /// has an effect.
    pub fn can_end(&self) -> bool {
        !self.is_terminal() && !self.is_ending()
    }

    pub fn failure_reason(&self) -> Option<ErrorKind> {
        match self {
            Self::Failed { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::AcquiringMedia => "AcquiringMedia",
            Self::ConnectingSignaling => "ConnectingSignaling",
            Self::Negotiating => "Negotiating",
            Self::Active { .. } => "Active",
            Self::Ending { .. } => "Ending",
            Self::Ended { .. } => "Ended",
            Self::Failed { .. } => "Failed",
        }
    }

    /// Apply a state transition. Returns error if transition is invalid.
    pub fn apply_transition(
        &mut self,
        transition: CallTransition,
    ) -> Result<(), InvalidTransition> {
        let new_state = match (&*self, transition) {
            (Self::Idle, CallTransition::Start) => Self::AcquiringMedia,
            (Self::AcquiringMedia, CallTransition::MediaAcquired) => Self::ConnectingSignaling,
            (Self::ConnectingSignaling, CallTransition::SignalingConnected) => Self::Negotiating,
            (Self::Negotiating, CallTransition::TransportConnected) => Self::Active {
                connected_at: Utc::now(),
            },
            (Self::Active { connected_at }, CallTransition::EndRequested) => Self::Ending {
                connected_at: Some(*connected_at),
            },
            (
                Self::Idle | Self::AcquiringMedia | Self::ConnectingSignaling | Self::Negotiating,
                CallTransition::EndRequested,
            ) => Self::Ending { connected_at: None },
            (Self::Ending { connected_at }, CallTransition::TeardownComplete) => {
                let ended_at = Utc::now();
                Self::Ended {
                    ended_at,
                    duration_secs: connected_at
                        .map(|start| ended_at.signed_duration_since(start).num_seconds()),
                }
            }
            (current, CallTransition::Fail(reason)) if !current.is_terminal() => Self::Failed {
                reason,
                ended_at: Utc::now(),
            },
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: current.name(),
                    attempted: transition,
                });
            }
        };
        *self = new_state;
        Ok(())
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { reason, .. } => write!(f, "Failed({reason})"),
            other => f.write_str(other.name()),
        }
    }
}

/// State transitions for call sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTransition {
    Start,
    MediaAcquired,
    SignalingConnected,
    TransportConnected,
    /// Local hangup, remote call-end, or lost transport.
    EndRequested,
    TeardownComplete,
    Fail(ErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub current_state: &'static str,
    pub attempted: CallTransition,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid transition {:?} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiating() -> CallState {
        let mut state = CallState::default();
        state.apply_transition(CallTransition::Start).unwrap();
        state.apply_transition(CallTransition::MediaAcquired).unwrap();
        state
            .apply_transition(CallTransition::SignalingConnected)
            .unwrap();
        state
    }

    /// Idle → AcquiringMedia → ConnectingSignaling → Negotiating → Active →
    /// Ending → Ended
    #[test]
    fn test_full_call_flow() {
        let mut state = negotiating();
        assert_eq!(state, CallState::Negotiating);

        state
            .apply_transition(CallTransition::TransportConnected)
            .unwrap();
        assert!(state.is_active());

        state.apply_transition(CallTransition::EndRequested).unwrap();
        assert!(matches!(
            state,
            CallState::Ending {
                connected_at: Some(_)
            }
        ));

        state
            .apply_transition(CallTransition::TeardownComplete)
            .unwrap();
        assert!(state.is_terminal());

        // Duration is recorded because the call was active.
        if let CallState::Ended { duration_secs, .. } = state {
            assert!(duration_secs.is_some());
        }
    }

    #[test]
    fn test_hangup_before_connect_has_no_duration() {
        let mut state = negotiating();
        state.apply_transition(CallTransition::EndRequested).unwrap();
        state
            .apply_transition(CallTransition::TeardownComplete)
            .unwrap();

        assert!(matches!(
            state,
            CallState::Ended {
                duration_secs: None,
                ..
            }
        ));
    }

    #[test]
    fn test_failure_reachable_from_every_non_terminal_state() {
        let mut states = vec![
            CallState::Idle,
            CallState::AcquiringMedia,
            CallState::ConnectingSignaling,
            CallState::Negotiating,
            CallState::Active {
                connected_at: Utc::now(),
            },
            CallState::Ending { connected_at: None },
        ];
        for state in &mut states {
            state
                .apply_transition(CallTransition::Fail(ErrorKind::NegotiationFailed))
                .unwrap();
            assert_eq!(state.failure_reason(), Some(ErrorKind::NegotiationFailed));
        }
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        let mut failed = CallState::default();
        failed
            .apply_transition(CallTransition::Fail(ErrorKind::PermissionDenied))
            .unwrap();

        for transition in [
            CallTransition::Start,
            CallTransition::EndRequested,
            CallTransition::TeardownComplete,
            CallTransition::Fail(ErrorKind::Unknown),
        ] {
            assert!(failed.apply_transition(transition).is_err());
        }
        assert_eq!(failed.failure_reason(), Some(ErrorKind::PermissionDenied));
    }

    #[test]
    fn test_second_end_trigger_rejected_while_ending() {
        let mut state = negotiating();
        state.apply_transition(CallTransition::EndRequested).unwrap();
        assert!(!state.can_end());

        let err = state
            .apply_transition(CallTransition::EndRequested)
            .unwrap_err();
        assert_eq!(err.current_state, "Ending");
    }

    #[test]
    fn test_invalid_transitions() {
        let mut state = CallState::default();

        // Can't skip media acquisition
        assert!(
            state
                .apply_transition(CallTransition::SignalingConnected)
                .is_err()
        );
        // Can't connect transport before negotiating
        assert!(
            state
                .apply_transition(CallTransition::TransportConnected)
                .is_err()
        );
        assert_eq!(state, CallState::Idle);
    }

    #[test]
    fn test_display() {
        assert_eq!(CallState::Negotiating.to_string(), "Negotiating");
        let failed = CallState::Failed {
            reason: ErrorKind::ConnectTimeout,
            ended_at: Utc::now(),
        };
        assert_eq!(failed.to_string(), "Failed(ConnectTimeout)");
    }
}
