use crate::error::EngineError;
use crate::media::ScreenSource;
use p2d_core::{ParticipantId, QualityProfile, RoomId};
use tokio::sync::oneshot;

/// Host operations, serialised through the controller's mailbox.
pub enum MeshCommand {
    JoinRoom {
        room: RoomId,
        name: Option<String>,
        participant_id: Option<ParticipantId>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    LeaveRoom {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    StartMicrophone {
        device_id: Option<String>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    StopMicrophone {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    ToggleMute {
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
    StartScreenShare {
        source: Box<dyn ScreenSource>,
        profile: QualityProfile,
        reply: oneshot::Sender<Result<String, EngineError>>,
    },
    StopScreenShare {
        stream_id: Option<String>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    SendChat {
        text: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
}
