mod data;
mod envelope;
mod participant;
mod profile;
mod room;

pub use data::{ChannelMessage, ChatPayload, SpeakingPayload};
pub use envelope::{Envelope, IceServerConfig};
pub use participant::{Participant, ParticipantId};
pub use profile::{
    BitrateMode, CodecPreference, ContentHint, FrameRate, QualityProfile, Resolution, VideoCodec,
};
pub use room::RoomId;
