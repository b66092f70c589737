use crate::room::command::ConnectionId;
use p2d_core::{Participant, ParticipantId};

/// One member of a room: the participant record plus the connection it
/// entered on. Join order is preserved by the owning `Vec`.
#[derive(Debug, Clone)]
pub struct Member {
    pub participant: Participant,
    pub conn: ConnectionId,
}

/// Membership of a single room. A room exists iff it has at least one
/// member; the registry drops empty rooms from its map.
#[derive(Debug, Default)]
pub struct Room {
    members: Vec<Member>,
}

impl Room {
    pub fn insert(&mut self, participant: Participant, conn: ConnectionId) {
        self.members.push(Member { participant, conn });
    }

    pub fn remove(&mut self, id: &ParticipantId) -> Option<Member> {
        let pos = self.members.iter().position(|m| &m.participant.id == id)?;
        Some(self.members.remove(pos))
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.members.iter().any(|m| &m.participant.id == id)
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&Member> {
        self.members.iter().find(|m| &m.participant.id == id)
    }

    pub fn conn_of(&self, id: &ParticipantId) -> Option<ConnectionId> {
        self.get(id).map(|m| m.conn)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Members in join order.
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.iter()
    }

    /// Members in join order, excluding one participant.
    pub fn others<'a, 'b>(&'a self, except: &'b ParticipantId) -> impl Iterator<Item = &'a Member> + use<'a, 'b> {
        self.members.iter().filter(move |m| &m.participant.id != except)
    }
}
