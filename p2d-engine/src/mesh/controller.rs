use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::media::{spawn_remote_audio, LocalTrack, MediaPipeline, ScreenSource, TrackState};
use crate::mesh::command::MeshCommand;
use crate::mesh::observer::{ConnectionState, MeshObserver};
use crate::session::{PeerSession, Role, SessionCommand, SessionConfig, SessionEvent};
use crate::signaling::{SignalingClient, SignalingEvent};
use p2d_core::{
    ChannelMessage, CodecPreference, Envelope, Participant, ParticipantId, QualityProfile, RoomId,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

/// Negotiation faults tolerated per peer before it is marked degraded
/// and rebuilds stop.
const DEGRADED_FAULT_LIMIT: u32 = 3;

enum ControllerInternal {
    TrackEnded(String),
}

struct SessionEntry {
    id: ParticipantId,
    role: Role,
    session: PeerSession,
}

/// Cloneable host-facing handle. Operations go through the controller's
/// mailbox; observable state is read from `watch` channels.
#[derive(Clone)]
pub struct MeshHandle {
    cmd_tx: mpsc::Sender<MeshCommand>,
    self_id_rx: watch::Receiver<Option<ParticipantId>>,
    participants_rx: watch::Receiver<Vec<ParticipantId>>,
    connection_rx: watch::Receiver<ConnectionState>,
}

impl MeshHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> MeshCommand,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::Transport("mesh controller stopped".into()))?;
        reply_rx
            .await
            .map_err(|_| EngineError::Transport("mesh controller stopped".into()))?
    }

    /// Join a freshly minted room and return its id.
    pub async fn create_room(&self, name: Option<String>) -> Result<RoomId, EngineError> {
        let room = RoomId::generate();
        self.join_room(room.clone(), name).await?;
        Ok(room)
    }

    pub async fn join_room(
        &self,
        room: RoomId,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        self.request(|reply| MeshCommand::JoinRoom {
            room,
            name,
            participant_id: None,
            reply,
        })
        .await
    }

    /// Join with a caller-chosen participant id instead of letting the
    /// server assign one.
    pub async fn join_room_as(
        &self,
        room: RoomId,
        participant_id: ParticipantId,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        self.request(|reply| MeshCommand::JoinRoom {
            room,
            name,
            participant_id: Some(participant_id),
            reply,
        })
        .await
    }

    pub async fn leave_room(&self) -> Result<(), EngineError> {
        self.request(|reply| MeshCommand::LeaveRoom { reply }).await
    }

    pub async fn start_microphone(
        &self,
        device_id: Option<String>,
    ) -> Result<(), EngineError> {
        self.request(|reply| MeshCommand::StartMicrophone { device_id, reply })
            .await
    }

    pub async fn stop_microphone(&self) -> Result<(), EngineError> {
        self.request(|reply| MeshCommand::StopMicrophone { reply })
            .await
    }

    /// Returns the new muted state.
    pub async fn toggle_mute(&self) -> Result<bool, EngineError> {
        self.request(|reply| MeshCommand::ToggleMute { reply }).await
    }

    /// Returns the minted `screen-<n>` stream id.
    pub async fn start_screen_share(
        &self,
        source: Box<dyn ScreenSource>,
        profile: QualityProfile,
    ) -> Result<String, EngineError> {
        self.request(|reply| MeshCommand::StartScreenShare {
            source,
            profile,
            reply,
        })
        .await
    }

    /// Stop one share by id, or all shares when `stream_id` is `None`.
    pub async fn stop_screen_share(
        &self,
        stream_id: Option<String>,
    ) -> Result<(), EngineError> {
        self.request(|reply| MeshCommand::StopScreenShare { stream_id, reply })
            .await
    }

    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), EngineError> {
        let text = text.into();
        self.request(|reply| MeshCommand::SendChat { text, reply })
            .await
    }

    pub fn self_id(&self) -> Option<ParticipantId> {
        self.self_id_rx.borrow().clone()
    }

    pub fn participants(&self) -> Vec<ParticipantId> {
        self.participants_rx.borrow().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_rx.borrow()
    }

    /// Watch participant-set changes, e.g. for mesh-completeness waits.
    pub fn watch_participants(&self) -> watch::Receiver<Vec<ParticipantId>> {
        self.participants_rx.clone()
    }
}

/// Owns the map remote-participant → peer session for one local
/// participant, bridges signaling to sessions, and broadcasts local
/// media to every session.
pub struct MeshController;

impl MeshController {
    pub fn spawn(config: EngineConfig, observer: Arc<dyn MeshObserver>) -> MeshHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (session_event_tx, session_event_rx) = mpsc::channel(256);
        let (vad_tx, vad_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let (self_id_tx, self_id_rx) = watch::channel(None);
        let (participants_tx, participants_rx) = watch::channel(Vec::new());
        let (connection_tx, connection_rx) = watch::channel(ConnectionState::Disconnected);

        let media = MediaPipeline::new(config.vad.clone(), vad_tx);

        let actor = MeshActor {
            config,
            observer,
            signaling: None,
            signaling_rx: None,
            signaling_connected: false,
            room: None,
            display_name: None,
            desired_id: None,
            self_id: None,
            roster: Vec::new(),
            sessions: Vec::new(),
            session_event_tx,
            media,
            deafened: Arc::new(AtomicBool::new(false)),
            codec_preference: CodecPreference::Auto,
            fault_counts: HashMap::new(),
            degraded: HashSet::new(),
            internal_tx,
            self_id_tx,
            participants_tx,
            connection_tx,
        };

        tokio::spawn(actor.run(cmd_rx, session_event_rx, vad_rx, internal_rx));

        MeshHandle {
            cmd_tx,
            self_id_rx,
            participants_rx,
            connection_rx,
        }
    }
}

struct MeshActor {
    config: EngineConfig,
    observer: Arc<dyn MeshObserver>,
    signaling: Option<SignalingClient>,
    signaling_rx: Option<mpsc::Receiver<SignalingEvent>>,
    signaling_connected: bool,
    room: Option<RoomId>,
    display_name: Option<String>,
    /// Identity we (re-)join with: preassigned by the host or learned
    /// from the first `JoinAck`. Survives reconnects.
    desired_id: Option<ParticipantId>,
    self_id: Option<ParticipantId>,
    /// Known room members in arrival order, excluding ourselves.
    roster: Vec<ParticipantId>,
    sessions: Vec<SessionEntry>,
    session_event_tx: mpsc::Sender<SessionEvent>,
    media: MediaPipeline,
    deafened: Arc<AtomicBool>,
    codec_preference: CodecPreference,
    fault_counts: HashMap<ParticipantId, u32>,
    degraded: HashSet<ParticipantId>,
    internal_tx: mpsc::UnboundedSender<ControllerInternal>,
    self_id_tx: watch::Sender<Option<ParticipantId>>,
    participants_tx: watch::Sender<Vec<ParticipantId>>,
    connection_tx: watch::Sender<ConnectionState>,
}

async fn recv_signaling(rx: &mut Option<mpsc::Receiver<SignalingEvent>>) -> SignalingEvent {
    match rx {
        Some(rx) => match rx.recv().await {
            Some(evt) => evt,
            None => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

impl MeshActor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<MeshCommand>,
        mut session_event_rx: mpsc::Receiver<SessionEvent>,
        mut vad_rx: mpsc::UnboundedReceiver<bool>,
        mut internal_rx: mpsc::UnboundedReceiver<ControllerInternal>,
    ) {
        info!("Mesh controller started");

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },

                evt = recv_signaling(&mut self.signaling_rx) => {
                    self.handle_signaling(evt).await;
                },

                evt = session_event_rx.recv() => {
                    // The controller holds a sender too, so this channel
                    // never yields `None` while the loop runs.
                    if let Some(evt) = evt {
                        self.handle_session_event(evt).await;
                    }
                },

                speaking = vad_rx.recv() => {
                    if let Some(speaking) = speaking {
                        self.handle_local_speaking(speaking).await;
                    }
                },

                evt = internal_rx.recv() => {
                    if let Some(ControllerInternal::TrackEnded(track_id)) = evt {
                        self.handle_track_ended(track_id).await;
                    }
                },
            }
        }

        info!("Mesh controller stopped");
    }

    async fn handle_command(&mut self, cmd: MeshCommand) {
        match cmd {
            MeshCommand::JoinRoom {
                room,
                name,
                participant_id,
                reply,
            } => {
                let _ = reply.send(self.join_room(room, name, participant_id).await);
            }
            MeshCommand::LeaveRoom { reply } => {
                let _ = reply.send(self.leave_room().await);
            }
            MeshCommand::StartMicrophone { device_id, reply } => {
                let result = match self.media.start_microphone(device_id).await {
                    Ok(track) => {
                        self.adopt_track(track).await;
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            MeshCommand::StopMicrophone { reply } => {
                // The track's end event drives sender removal in every
                // session.
                self.media.stop_microphone();
                let _ = reply.send(Ok(()));
            }
            MeshCommand::ToggleMute { reply } => {
                let _ = reply.send(self.media.toggle_mute());
            }
            MeshCommand::StartScreenShare {
                source,
                profile,
                reply,
            } => {
                let result = match self.media.start_screen(source, &profile).await {
                    Ok(track) => {
                        self.set_codec_preference(profile.codec).await;
                        let stream_id = track.id();
                        self.adopt_track(track).await;
                        Ok(stream_id)
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            MeshCommand::StopScreenShare { stream_id, reply } => {
                self.media.stop_screen(stream_id.as_deref());
                let _ = reply.send(Ok(()));
            }
            MeshCommand::SendChat { text, reply } => {
                let result = if self.room.is_none() {
                    Err(EngineError::Misuse("not in a room"))
                } else {
                    self.broadcast_data(ChannelMessage::chat(text)).await;
                    Ok(())
                };
                let _ = reply.send(result);
            }
        }
    }

    async fn join_room(
        &mut self,
        room: RoomId,
        name: Option<String>,
        participant_id: Option<ParticipantId>,
    ) -> Result<(), EngineError> {
        if self.room.is_some() {
            self.teardown_room_state().await;
        }

        info!("Joining room {room}");
        self.room = Some(room);
        self.display_name = name;
        self.desired_id = participant_id;

        if self.signaling.is_none() {
            let (client, events) = SignalingClient::spawn(&self.config)?;
            self.signaling = Some(client);
            self.signaling_rx = Some(events);
            self.set_connection_state(ConnectionState::Connecting).await;
        } else if self.signaling_connected {
            self.send_join();
        }

        Ok(())
    }

    async fn leave_room(&mut self) -> Result<(), EngineError> {
        if self.room.is_none() {
            return Err(EngineError::Misuse("not in a room"));
        }

        if let (Some(signaling), Some(id)) = (&self.signaling, self.current_id()) {
            let _ = signaling.send(Envelope::Leave {
                participant_id: id,
            });
        }

        self.teardown_room_state().await;
        self.media.stop_all();

        if let Some(signaling) = self.signaling.take() {
            signaling.disconnect();
        }
        self.signaling_rx = None;
        self.signaling_connected = false;
        self.set_connection_state(ConnectionState::Disconnected).await;

        Ok(())
    }

    /// Close every session and clear room-scoped bookkeeping. Media and
    /// the signaling link are handled by the callers that need to.
    async fn teardown_room_state(&mut self) {
        for entry in self.sessions.drain(..) {
            entry.session.close().await;
        }
        self.roster.clear();
        self.fault_counts.clear();
        self.degraded.clear();
        self.room = None;
        self.self_id = None;
        self.publish_roster().await;
        let _ = self.self_id_tx.send(None);
    }

    fn current_id(&self) -> Option<ParticipantId> {
        self.self_id.clone().or_else(|| self.desired_id.clone())
    }

    fn send_join(&self) {
        let (Some(signaling), Some(room)) = (&self.signaling, &self.room) else {
            return;
        };
        let _ = signaling.send(Envelope::Join {
            room_id: room.clone(),
            participant_id: self.current_id(),
            name: self.display_name.clone(),
        });
    }

    async fn handle_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Connected => {
                self.signaling_connected = true;
                self.set_connection_state(ConnectionState::Connected).await;
                // The mesh controller owns re-joining; the transport
                // replays nothing.
                self.send_join();
            }
            SignalingEvent::Disconnected => {
                self.signaling_connected = false;
                let state = if self.room.is_some() {
                    ConnectionState::Connecting
                } else {
                    ConnectionState::Disconnected
                };
                self.set_connection_state(state).await;
            }
            SignalingEvent::Envelope(envelope) => self.handle_envelope(envelope).await,
        }
    }

    async fn handle_envelope(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::JoinAck {
                participant_id,
                existing,
                ..
            } => self.handle_join_ack(participant_id, existing).await,

            Envelope::PeerJoined {
                participant_id,
                name,
            } => self.handle_peer_joined(participant_id, name).await,

            Envelope::PeerLeft { participant_id } => {
                self.handle_peer_left(participant_id).await
            }

            Envelope::Offer {
                sender_id: Some(from),
                sdp,
                ..
            } => {
                if Some(&from) == self.self_id.as_ref() {
                    return;
                }
                // An offer may precede the PeerJoined bookkeeping; a
                // responder session is materialised on demand.
                if self.find_session(&from).is_none() {
                    self.create_session(from.clone(), Role::Responder).await;
                    if !self.roster.contains(&from) {
                        self.roster.push(from.clone());
                        self.publish_roster().await;
                    }
                }
                if let Some(entry) = self.find_session(&from) {
                    entry
                        .session
                        .command(SessionCommand::ApplyRemoteOffer { sdp })
                        .await;
                }
            }

            Envelope::Answer {
                sender_id: Some(from),
                sdp,
                ..
            } => match self.find_session(&from) {
                Some(entry) => {
                    entry
                        .session
                        .command(SessionCommand::ApplyRemoteAnswer { sdp })
                        .await;
                }
                None => debug!("Answer from {from} without a session; dropped"),
            },

            Envelope::IceCandidate {
                sender_id: Some(from),
                candidate,
                ..
            } => match self.find_session(&from) {
                Some(entry) => {
                    entry
                        .session
                        .command(SessionCommand::AddRemoteCandidate { candidate })
                        .await;
                }
                None => debug!("Candidate from {from} without a session; dropped"),
            },

            Envelope::Offer { sender_id: None, .. }
            | Envelope::Answer { sender_id: None, .. }
            | Envelope::IceCandidate { sender_id: None, .. } => {
                warn!("Addressed envelope without server-stamped sender; dropped");
            }

            // Ping/Pong live inside the signaling client; the rest are
            // client-to-server only.
            _ => {}
        }
    }

    async fn handle_join_ack(
        &mut self,
        participant_id: ParticipantId,
        existing: Vec<Participant>,
    ) {
        info!(
            "Joined as {participant_id}; {} existing member(s)",
            existing.len()
        );

        // A fresh ack means a fresh mesh: any sessions that survived a
        // signaling drop are stale because remote peers saw us leave.
        for entry in self.sessions.drain(..) {
            entry.session.close().await;
        }
        self.roster.clear();
        self.fault_counts.clear();
        self.degraded.clear();

        self.self_id = Some(participant_id.clone());
        self.desired_id = Some(participant_id.clone());
        let _ = self.self_id_tx.send(Some(participant_id.clone()));
        self.observer.on_self_id(participant_id).await;

        // We are the newcomer: initiator toward everyone already here.
        for participant in existing {
            self.roster.push(participant.id.clone());
            self.observer
                .on_participant_joined(participant.id.clone(), participant.name.clone())
                .await;
            self.create_session(participant.id, Role::Initiator).await;
        }
        self.publish_roster().await;
    }

    async fn handle_peer_joined(&mut self, id: ParticipantId, name: Option<String>) {
        if Some(&id) == self.self_id.as_ref() {
            return;
        }
        info!("Peer joined: {id}");

        // A rejoin after heartbeat loss arrives as a fresh PeerJoined
        // while the dead session lingers; replace it.
        if let Some(pos) = self.sessions.iter().position(|s| s.id == id) {
            let stale = self.sessions.remove(pos);
            stale.session.close().await;
        }
        self.fault_counts.remove(&id);
        self.degraded.remove(&id);

        if !self.roster.contains(&id) {
            self.roster.push(id.clone());
        }
        self.publish_roster().await;
        self.observer
            .on_participant_joined(id.clone(), name)
            .await;

        // The newcomer initiates; we answer.
        self.create_session(id, Role::Responder).await;
    }

    async fn handle_peer_left(&mut self, id: ParticipantId) {
        info!("Peer left: {id}");
        if let Some(pos) = self.sessions.iter().position(|s| s.id == id) {
            let entry = self.sessions.remove(pos);
            entry.session.close().await;
        }
        self.roster.retain(|p| p != &id);
        self.fault_counts.remove(&id);
        self.degraded.remove(&id);
        self.publish_roster().await;
        self.observer.on_participant_left(id).await;
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Outbound(envelope) => {
                if let Some(signaling) = &self.signaling {
                    let _ = signaling.send(envelope);
                }
            }
            SessionEvent::StateChanged { peer, state } => {
                debug!("Session {peer} → {state:?}");
                self.observer.on_session_state(peer, state).await;
            }
            SessionEvent::RemoteTrack { peer, track } => {
                if self.config.play_remote_audio && track.kind() == RTPCodecType::Audio {
                    spawn_remote_audio(track.clone(), self.deafened.clone());
                }
                self.observer.on_remote_track(peer, track).await;
            }
            SessionEvent::Data { peer, message } => match message {
                ChannelMessage::Chat { payload, .. } => {
                    self.observer.on_chat(peer, payload.text).await;
                }
                ChannelMessage::Speaking { payload, .. } => {
                    self.observer.on_speaking(peer, payload.speaking).await;
                }
                ChannelMessage::Control { .. } => {
                    debug!("Control message from {peer} ignored");
                }
            },
            SessionEvent::Fault { peer, error } => {
                let count = self.fault_counts.entry(peer.clone()).or_insert(0);
                *count += 1;
                warn!("Fault {count}/{DEGRADED_FAULT_LIMIT} for {peer}: {error}");
                if *count >= DEGRADED_FAULT_LIMIT && self.degraded.insert(peer.clone()) {
                    warn!("Peer {peer} marked degraded; retries paused");
                    if let Some(pos) = self.sessions.iter().position(|s| s.id == peer) {
                        let entry = self.sessions.remove(pos);
                        entry.session.close().await;
                    }
                }
            }
            SessionEvent::RecoveryNeeded { peer } => {
                let Some(pos) = self.sessions.iter().position(|s| s.id == peer) else {
                    return;
                };
                let entry = self.sessions.remove(pos);
                if self.degraded.contains(&peer) {
                    debug!("Not rebuilding degraded peer {peer}");
                    return;
                }
                info!("Rebuilding session with {peer} as {:?}", entry.role);
                self.create_session(peer, entry.role).await;
            }
            SessionEvent::Closed { peer } => {
                self.sessions.retain(|s| s.id != peer);
            }
        }
    }

    async fn handle_local_speaking(&mut self, speaking: bool) {
        self.observer.on_local_speaking(speaking).await;
        self.broadcast_data(ChannelMessage::speaking(speaking)).await;
    }

    async fn handle_track_ended(&mut self, track_id: String) {
        debug!("Local track ended: {track_id}");
        self.media.forget_screen(&track_id);
        for entry in &self.sessions {
            entry
                .session
                .command(SessionCommand::RemoveTrack {
                    track_id: track_id.clone(),
                })
                .await;
        }
    }

    /// Register the end watcher and attach the track to every session,
    /// in session insertion order.
    async fn adopt_track(&mut self, track: LocalTrack) {
        self.watch_track_end(&track);
        for entry in &self.sessions {
            entry
                .session
                .command(SessionCommand::AddTrack(track.clone()))
                .await;
        }
    }

    fn watch_track_end(&self, track: &LocalTrack) {
        let mut state = track.watch_state();
        let internal_tx = self.internal_tx.clone();
        let track_id = track.id();
        tokio::spawn(async move {
            while state.changed().await.is_ok() {
                if *state.borrow() == TrackState::Ended {
                    let _ = internal_tx.send(ControllerInternal::TrackEnded(track_id));
                    break;
                }
            }
        });
    }

    async fn set_codec_preference(&mut self, preference: CodecPreference) {
        if self.codec_preference == preference {
            return;
        }
        self.codec_preference = preference;
        for entry in &self.sessions {
            entry
                .session
                .command(SessionCommand::SetCodecPreference(preference))
                .await;
        }
    }

    async fn create_session(&mut self, remote: ParticipantId, role: Role) {
        if self.degraded.contains(&remote) {
            debug!("Skipping session for degraded peer {remote}");
            return;
        }

        let session_config = SessionConfig {
            ice_servers: self.config.ice_servers.clone(),
            codec_preference: self.codec_preference,
            ..Default::default()
        };

        match PeerSession::spawn(
            remote.clone(),
            role,
            session_config,
            self.media.live_tracks(),
            self.session_event_tx.clone(),
        )
        .await
        {
            Ok(session) => {
                self.sessions.push(SessionEntry {
                    id: remote,
                    role,
                    session,
                });
            }
            Err(e) => {
                warn!("Failed to create session with {remote}: {e}");
            }
        }
    }

    fn find_session(&self, id: &ParticipantId) -> Option<&SessionEntry> {
        self.sessions.iter().find(|s| &s.id == id)
    }

    async fn broadcast_data(&self, message: ChannelMessage) {
        for entry in &self.sessions {
            entry
                .session
                .command(SessionCommand::SendData(message.clone()))
                .await;
        }
    }

    async fn publish_roster(&self) {
        let _ = self.participants_tx.send(self.roster.clone());
    }

    async fn set_connection_state(&self, state: ConnectionState) {
        let _ = self.connection_tx.send(state);
        self.observer.on_connection_state(state).await;
    }
}
