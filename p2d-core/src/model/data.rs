use crate::model::participant::unix_millis;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatPayload {
    pub text: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpeakingPayload {
    pub speaking: bool,
}

/// Message carried over the `p2d-data` channel. Ordered within one peer
/// link; never synchronised with media packets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelMessage {
    Chat {
        payload: ChatPayload,
        timestamp: u64,
    },
    Speaking {
        payload: SpeakingPayload,
        timestamp: u64,
    },
    Control {
        /// Opaque, sender-defined body; the mesh core never inspects it.
        payload: String,
        timestamp: u64,
    },
}

impl ChannelMessage {
    pub fn chat(text: impl Into<String>) -> Self {
        Self::Chat {
            payload: ChatPayload { text: text.into() },
            timestamp: unix_millis(),
        }
    }

    pub fn speaking(speaking: bool) -> Self {
        Self::Speaking {
            payload: SpeakingPayload { speaking },
            timestamp: unix_millis(),
        }
    }
}
