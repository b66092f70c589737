use p2d_core::ParticipantId;
use thiserror::Error;

/// Engine fault taxonomy. Transient transport and per-peer negotiation
/// faults stay internal to the mesh controller; device and room-level
/// faults reach the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transport drop, heartbeat timeout, dead signaling link.
    #[error("transport: {0}")]
    Transport(String),

    /// SDP parse failure, state-order violation, unexpected answer.
    #[error("negotiation with {peer}: {reason}")]
    Negotiation {
        peer: ParticipantId,
        reason: String,
    },

    /// Microphone or screen source acquisition failed or was revoked.
    #[error("device: {0}")]
    Device(String),

    /// Malformed envelope or data-channel frame.
    #[error("protocol: {0}")]
    Protocol(String),

    /// Codec or track plumbing failure.
    #[error("media: {0}")]
    Media(String),

    /// Operation used out of order, e.g. chat before joining a room.
    #[error("misuse: {0}")]
    Misuse(&'static str),
}

impl EngineError {
    pub fn device(err: impl std::fmt::Display) -> Self {
        Self::Device(err.to_string())
    }

    pub fn media(err: impl std::fmt::Display) -> Self {
        Self::Media(err.to_string())
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn negotiation(peer: &ParticipantId, err: impl std::fmt::Display) -> Self {
        Self::Negotiation {
            peer: peer.clone(),
            reason: err.to_string(),
        }
    }
}

impl From<webrtc::Error> for EngineError {
    fn from(err: webrtc::Error) -> Self {
        Self::Media(err.to_string())
    }
}
