use crate::room::command::{ConnectionId, RegistryCommand};
use crate::room::room::Room;
use p2d_core::{Envelope, Participant, ParticipantId, RoomId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

struct ConnectionRecord {
    tx: mpsc::UnboundedSender<Envelope>,
    room: Option<RoomId>,
    participant: Option<ParticipantId>,
}

/// Cloneable handle the connection handlers use to reach the registry.
#[derive(Clone)]
pub struct RegistryHandle {
    cmd_tx: mpsc::Sender<RegistryCommand>,
    next_conn: Arc<AtomicU64>,
}

impl RegistryHandle {
    pub fn allocate_connection(&self) -> ConnectionId {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn send(&self, cmd: RegistryCommand) {
        if self.cmd_tx.send(cmd).await.is_err() {
            warn!("Registry loop is gone; dropping command");
        }
    }
}

/// Owns the room → membership map. All mutation happens on this actor's
/// event loop; connection handlers only talk to it through commands.
///
/// The server never inspects SDP or ICE payloads. Addressed envelopes
/// are forwarded unmodified except for sender-id injection.
pub struct Registry {
    cmd_rx: mpsc::Receiver<RegistryCommand>,
    connections: HashMap<ConnectionId, ConnectionRecord>,
    rooms: HashMap<RoomId, Room>,
}

impl Registry {
    /// Spawn the registry loop and return the handle for connections.
    pub fn spawn() -> RegistryHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let registry = Self {
            cmd_rx,
            connections: HashMap::new(),
            rooms: HashMap::new(),
        };
        tokio::spawn(registry.run());

        RegistryHandle {
            cmd_tx,
            next_conn: Arc::new(AtomicU64::new(1)),
        }
    }

    pub async fn run(mut self) {
        info!("Registry event loop started");

        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                RegistryCommand::Connected { conn, tx } => {
                    self.connections.insert(
                        conn,
                        ConnectionRecord {
                            tx,
                            room: None,
                            participant: None,
                        },
                    );
                }
                RegistryCommand::Inbound { conn, envelope } => {
                    self.handle_inbound(conn, envelope);
                }
                RegistryCommand::Closed { conn } => {
                    self.leave_current_room(conn);
                    self.connections.remove(&conn);
                }
            }
        }

        info!("Registry event loop finished");
    }

    fn handle_inbound(&mut self, conn: ConnectionId, envelope: Envelope) {
        match envelope {
            Envelope::Join {
                room_id,
                participant_id,
                name,
            } => self.handle_join(conn, room_id, participant_id, name),

            Envelope::Leave { .. } => {
                self.leave_current_room(conn);
            }

            env @ (Envelope::Offer { .. }
            | Envelope::Answer { .. }
            | Envelope::IceCandidate { .. }) => self.relay_addressed(conn, env),

            Envelope::Ping => self.reply(conn, Envelope::Pong),
            Envelope::Pong => {}

            other => {
                warn!("Server-bound variant from connection {conn}: {other:?}");
            }
        }
    }

    fn handle_join(
        &mut self,
        conn: ConnectionId,
        room_id: RoomId,
        participant_id: Option<ParticipantId>,
        name: Option<String>,
    ) {
        // Repeated Join with the same id on the same connection leaves
        // membership untouched; the client just gets a fresh ack.
        if let Some(record) = self.connections.get(&conn) {
            if let Some(id) = &participant_id {
                if record.room.as_ref() == Some(&room_id) && record.participant.as_ref() == Some(id)
                {
                    let existing = self.existing_members(&room_id, id);
                    let id = id.clone();
                    self.reply(
                        conn,
                        Envelope::JoinAck {
                            room_id,
                            participant_id: id,
                            existing,
                        },
                    );
                    return;
                }
            }
        } else {
            warn!("Join from unknown connection {conn}");
            return;
        }

        self.leave_current_room(conn);

        let id = participant_id.unwrap_or_else(ParticipantId::generate);

        // A participant id lives in at most one room on at most one
        // connection. A rejoin from a new socket (heartbeat loss) evicts
        // the stale membership before the fresh one is inserted.
        self.evict_participant(&id);

        let existing = self.existing_members(&room_id, &id);

        let participant = Participant::new(id.clone(), name.clone());
        let room = self.rooms.entry(room_id.clone()).or_insert_with(|| {
            info!("Creating room {room_id}");
            Room::default()
        });
        room.insert(participant, conn);

        let Some(record) = self.connections.get_mut(&conn) else {
            return;
        };
        record.room = Some(room_id.clone());
        record.participant = Some(id.clone());

        info!("Participant {id} joined room {room_id} ({} members)", self.rooms[&room_id].len());

        self.reply(
            conn,
            Envelope::JoinAck {
                room_id: room_id.clone(),
                participant_id: id.clone(),
                existing,
            },
        );

        self.broadcast_except(
            &room_id,
            &id,
            Envelope::PeerJoined {
                participant_id: id.clone(),
                name,
            },
        );
    }

    /// Forward an addressed envelope to its target, within the sender's
    /// room only. A missing target is not an error; the peer may have
    /// left between send and delivery.
    fn relay_addressed(&mut self, conn: ConnectionId, envelope: Envelope) {
        let Some(record) = self.connections.get(&conn) else {
            return;
        };
        let (Some(room_id), Some(sender_id)) = (record.room.clone(), record.participant.clone())
        else {
            warn!("Addressed envelope from connection {conn} outside any room");
            return;
        };
        let Some(room) = self.rooms.get(&room_id) else {
            return;
        };
        let Some(target_id) = envelope.target().cloned() else {
            return;
        };
        let Some(target_conn) = room.conn_of(&target_id) else {
            debug!("Dropping {envelope:?}: {target_id} is not in {room_id}");
            return;
        };

        let stamped = envelope.with_sender(sender_id);
        if let Some(target) = self.connections.get(&target_conn) {
            if target.tx.send(stamped).is_err() {
                debug!("Dropping relay to {target_id}: connection closed");
            }
        }
    }

    /// Remove the connection from whatever room it is in, notifying the
    /// remaining members and deleting the room once it empties.
    fn leave_current_room(&mut self, conn: ConnectionId) {
        let Some(record) = self.connections.get_mut(&conn) else {
            return;
        };
        let (Some(room_id), Some(id)) = (record.room.take(), record.participant.take()) else {
            return;
        };

        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.remove(&id);
            info!("Participant {id} left room {room_id}");
            if room.is_empty() {
                info!("Deleting empty room {room_id}");
                self.rooms.remove(&room_id);
            } else {
                self.broadcast_except(
                    &room_id,
                    &id,
                    Envelope::PeerLeft {
                        participant_id: id.clone(),
                    },
                );
            }
        }
    }

    /// Drop any membership the id holds, wherever it is. Used before a
    /// join so the uniqueness invariant survives client reconnects.
    fn evict_participant(&mut self, id: &ParticipantId) {
        let holder = self.rooms.iter().find_map(|(room_id, room)| {
            room.get(id).map(|m| (room_id.clone(), m.conn))
        });
        let Some((room_id, old_conn)) = holder else {
            return;
        };

        info!("Evicting stale membership of {id} in {room_id}");
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.remove(id);
            if room.is_empty() {
                self.rooms.remove(&room_id);
            } else {
                self.broadcast_except(
                    &room_id,
                    id,
                    Envelope::PeerLeft {
                        participant_id: id.clone(),
                    },
                );
            }
        }
        if let Some(old) = self.connections.get_mut(&old_conn) {
            old.room = None;
            old.participant = None;
        }
    }

    fn existing_members(&self, room_id: &RoomId, except: &ParticipantId) -> Vec<Participant> {
        self.rooms
            .get(room_id)
            .map(|room| {
                room.others(except)
                    .map(|m| m.participant.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn broadcast_except(&self, room_id: &RoomId, except: &ParticipantId, envelope: Envelope) {
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };
        for member in room.others(except) {
            if let Some(record) = self.connections.get(&member.conn) {
                if record.tx.send(envelope.clone()).is_err() {
                    debug!("Dropping broadcast to {}: connection closed", member.participant.id);
                }
            }
        }
    }

    fn reply(&self, conn: ConnectionId, envelope: Envelope) {
        if let Some(record) = self.connections.get(&conn) {
            let _ = record.tx.send(envelope);
        }
    }
}
