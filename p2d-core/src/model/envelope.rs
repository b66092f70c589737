use crate::model::participant::{Participant, ParticipantId};
use crate::model::room::RoomId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// One signaling frame. JSON text, one envelope per frame; unknown tags
/// fail to parse and are dropped at the transport boundary.
///
/// `sender_id` on the addressed variants is injected by the server on
/// relay. Receivers route on it and never trust a sender-supplied id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename_all = "camelCase")]
    Join {
        room_id: RoomId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        participant_id: Option<ParticipantId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    JoinAck {
        room_id: RoomId,
        participant_id: ParticipantId,
        existing: Vec<Participant>,
    },
    #[serde(rename_all = "camelCase")]
    Leave { participant_id: ParticipantId },
    #[serde(rename_all = "camelCase")]
    PeerJoined {
        participant_id: ParticipantId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    PeerLeft { participant_id: ParticipantId },
    #[serde(rename_all = "camelCase")]
    Offer {
        target_id: ParticipantId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<ParticipantId>,
        sdp: String,
    },
    #[serde(rename_all = "camelCase")]
    Answer {
        target_id: ParticipantId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<ParticipantId>,
        sdp: String,
    },
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        target_id: ParticipantId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<ParticipantId>,
        candidate: String,
    },
    Ping,
    Pong,
}

impl Envelope {
    /// Target of an addressed envelope, if this variant carries one.
    pub fn target(&self) -> Option<&ParticipantId> {
        match self {
            Envelope::Offer { target_id, .. }
            | Envelope::Answer { target_id, .. }
            | Envelope::IceCandidate { target_id, .. } => Some(target_id),
            _ => None,
        }
    }

    /// Stamp the server-verified sender onto an addressed envelope.
    pub fn with_sender(mut self, id: ParticipantId) -> Self {
        match &mut self {
            Envelope::Offer { sender_id, .. }
            | Envelope::Answer { sender_id, .. }
            | Envelope::IceCandidate { sender_id, .. } => *sender_id = Some(id),
            _ => {}
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_wire_shape() {
        let env = Envelope::Join {
            room_id: RoomId::from("R"),
            participant_id: Some(ParticipantId::from("A")),
            name: None,
        };
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "Join", "roomId": "R", "participantId": "A"})
        );
    }

    #[test]
    fn offer_round_trip_with_injected_sender() {
        let env = Envelope::Offer {
            target_id: ParticipantId::from("A"),
            sender_id: None,
            sdp: "v=0".into(),
        };
        let relayed = env.with_sender(ParticipantId::from("B"));
        let json = serde_json::to_string(&relayed).unwrap();
        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, relayed);
        assert_eq!(parsed.target(), Some(&ParticipantId::from("A")));
    }

    #[test]
    fn ping_is_bare_tag() {
        assert_eq!(
            serde_json::to_string(&Envelope::Ping).unwrap(),
            r#"{"type":"Ping"}"#
        );
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let res: Result<Envelope, _> = serde_json::from_str(r#"{"type":"Hijack"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn join_ack_lists_existing() {
        let ack = Envelope::JoinAck {
            room_id: RoomId::from("R"),
            participant_id: ParticipantId::from("B"),
            existing: vec![Participant::new(ParticipantId::from("A"), None)],
        };
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["existing"][0]["id"], "A");
        assert!(json["existing"][0].get("joinedAt").is_some());
    }
}
