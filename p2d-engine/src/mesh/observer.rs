use crate::session::NegotiationState;
use async_trait::async_trait;
use p2d_core::ParticipantId;
use std::sync::Arc;
use webrtc::track::track_remote::TrackRemote;

/// Signaling link state as the host sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Host-side surface of the mesh. Every method has a default no-op so
/// hosts implement only what they render. Callbacks fire on the
/// controller's event loop; keep them cheap.
#[async_trait]
pub trait MeshObserver: Send + Sync + 'static {
    async fn on_connection_state(&self, _state: ConnectionState) {}

    /// The server-confirmed identity of this participant.
    async fn on_self_id(&self, _id: ParticipantId) {}

    async fn on_participant_joined(&self, _id: ParticipantId, _name: Option<String>) {}

    async fn on_participant_left(&self, _id: ParticipantId) {}

    async fn on_session_state(&self, _peer: ParticipantId, _state: NegotiationState) {}

    /// A remote media track became available.
    async fn on_remote_track(&self, _peer: ParticipantId, _track: Arc<TrackRemote>) {}

    async fn on_speaking(&self, _peer: ParticipantId, _speaking: bool) {}

    async fn on_local_speaking(&self, _speaking: bool) {}

    async fn on_chat(&self, _peer: ParticipantId, _text: String) {}
}
