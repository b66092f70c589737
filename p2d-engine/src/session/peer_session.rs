use crate::error::EngineError;
use crate::media::{default_video_codecs, order_codecs, LocalTrack};
use crate::session::state::{NegotiationState, Role};
use p2d_core::{ChannelMessage, CodecPreference, Envelope, IceServerConfig, ParticipantId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_remote::TrackRemote;

/// Name of the reliable, ordered control channel on every session.
pub const DATA_CHANNEL_LABEL: &str = "p2d-data";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ice_servers: Vec<IceServerConfig>,
    pub codec_preference: CodecPreference,
    /// ICE `disconnected` must persist this long before the session is
    /// torn down for rebuild. `failed` recovers immediately.
    pub disconnect_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig {
                urls: vec!["stun:stun.l.google.com:19302".to_owned()],
                username: None,
                credential: None,
            }],
            codec_preference: CodecPreference::Auto,
            disconnect_grace: Duration::from_secs(3),
        }
    }
}

/// Commands are applied strictly in arrival order; all SDP work for one
/// remote peer is serialised through this mailbox.
#[derive(Debug)]
pub enum SessionCommand {
    ApplyRemoteOffer { sdp: String },
    ApplyRemoteAnswer { sdp: String },
    AddRemoteCandidate { candidate: String },
    AddTrack(LocalTrack),
    RemoveTrack { track_id: String },
    SetCodecPreference(CodecPreference),
    SendData(ChannelMessage),
    Close,
}

pub enum SessionEvent {
    /// Envelope ready for the signaling path, already addressed to the
    /// remote peer; the server stamps the sender id.
    Outbound(Envelope),
    StateChanged {
        peer: ParticipantId,
        state: NegotiationState,
    },
    RemoteTrack {
        peer: ParticipantId,
        track: Arc<TrackRemote>,
    },
    Data {
        peer: ParticipantId,
        message: ChannelMessage,
    },
    /// Negotiation fault the session survived; the controller counts
    /// these per peer.
    Fault {
        peer: ParticipantId,
        error: EngineError,
    },
    /// Transport is beyond saving; the controller rebuilds the session
    /// with the same role.
    RecoveryNeeded { peer: ParticipantId },
    Closed { peer: ParticipantId },
}

enum InternalEvent {
    CandidateGenerated(String),
    ConnectionState(RTCPeerConnectionState),
    DataChannelOpen(Arc<RTCDataChannel>),
    DataMessage(ChannelMessage),
    RemoteTrack(Arc<TrackRemote>),
}

/// Handle to one full-duplex session with one remote participant. The
/// underlying connection is owned by the session's actor task.
pub struct PeerSession {
    remote: ParticipantId,
    role: Role,
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl PeerSession {
    pub async fn spawn(
        remote: ParticipantId,
        role: Role,
        config: SessionConfig,
        initial_tracks: Vec<LocalTrack>,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Result<Self, EngineError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config
                .ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await?);
        let (internal_tx, internal_rx) = mpsc::channel::<InternalEvent>(64);

        let state_tx = internal_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = state_tx.clone();
            Box::pin(async move {
                let _ = tx.send(InternalEvent::ConnectionState(state)).await;
            })
        }));

        let ice_tx = internal_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = ice_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                let Ok(json) = candidate.to_json() else { return };
                let Ok(serialized) = serde_json::to_string(&json) else {
                    return;
                };
                let _ = tx.send(InternalEvent::CandidateGenerated(serialized)).await;
            })
        }));

        let track_tx = internal_tx.clone();
        pc.on_track(Box::new(move |track, _, _| {
            let tx = track_tx.clone();
            Box::pin(async move {
                let _ = tx.send(InternalEvent::RemoteTrack(track)).await;
            })
        }));

        // The initiator creates the control channel; the responder
        // accepts whatever the peer opened.
        match role {
            Role::Initiator => {
                let dc = pc.create_data_channel(DATA_CHANNEL_LABEL, None).await?;
                wire_data_channel(&dc, internal_tx.clone());
            }
            Role::Responder => {
                let dc_tx = internal_tx.clone();
                pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    let tx = dc_tx.clone();
                    Box::pin(async move {
                        debug!("Accepted data channel {:?}", dc.label());
                        wire_data_channel(&dc, tx);
                    })
                }));
            }
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let mut actor = SessionActor {
            remote: remote.clone(),
            role,
            config,
            pc,
            state: NegotiationState::New,
            needs_offer: role == Role::Initiator,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            senders: HashMap::new(),
            data_channel: None,
            grace_deadline: None,
            event_tx,
        };

        for track in initial_tracks {
            actor.add_track(track).await;
        }

        tokio::spawn(actor.run(cmd_rx, internal_rx));

        Ok(Self {
            remote,
            role,
            cmd_tx,
        })
    }

    pub fn remote(&self) -> &ParticipantId {
        &self.remote
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Enqueue a command. A session that already wound down swallows it.
    pub async fn command(&self, cmd: SessionCommand) {
        if self.cmd_tx.send(cmd).await.is_err() {
            debug!("Session {} is gone; command dropped", self.remote);
        }
    }

    pub async fn close(&self) {
        self.command(SessionCommand::Close).await;
    }
}

fn wire_data_channel(dc: &Arc<RTCDataChannel>, internal_tx: mpsc::Sender<InternalEvent>) {
    let msg_tx = internal_tx.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = msg_tx.clone();
        Box::pin(async move {
            match serde_json::from_slice::<ChannelMessage>(&msg.data) {
                Ok(parsed) => {
                    let _ = tx.send(InternalEvent::DataMessage(parsed)).await;
                }
                Err(e) => warn!("Malformed data-channel frame dropped: {e}"),
            }
        })
    }));

    let open_dc = dc.clone();
    dc.on_open(Box::new(move || {
        let tx = internal_tx.clone();
        let dc = open_dc.clone();
        Box::pin(async move {
            let _ = tx.send(InternalEvent::DataChannelOpen(dc)).await;
        })
    }));
}

struct SessionActor {
    remote: ParticipantId,
    role: Role,
    config: SessionConfig,
    pc: Arc<RTCPeerConnection>,
    state: NegotiationState,
    needs_offer: bool,
    remote_description_set: bool,
    pending_candidates: Vec<String>,
    senders: HashMap<String, Arc<RTCRtpSender>>,
    data_channel: Option<Arc<RTCDataChannel>>,
    grace_deadline: Option<Instant>,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<SessionCommand>,
        mut internal_rx: mpsc::Receiver<InternalEvent>,
    ) {
        info!("Session with {} started as {:?}", self.remote, self.role);
        self.maybe_negotiate().await;

        let mut grace_check = tokio::time::interval(Duration::from_millis(500));

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(SessionCommand::Close) | None => {
                        self.shutdown().await;
                        return;
                    }
                    Some(cmd) => {
                        self.handle_command(cmd).await;
                        if self.state.is_terminal() {
                            return;
                        }
                    }
                },

                evt = internal_rx.recv() => match evt {
                    Some(evt) => {
                        self.handle_internal(evt).await;
                        if self.state.is_terminal() {
                            return;
                        }
                    }
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },

                _ = grace_check.tick() => {
                    if let Some(deadline) = self.grace_deadline {
                        if Instant::now() >= deadline {
                            warn!("ICE disconnect grace expired for {}", self.remote);
                            self.recover().await;
                            return;
                        }
                    }
                },
            }
        }
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::ApplyRemoteOffer { sdp } => self.apply_remote_offer(sdp).await,
            SessionCommand::ApplyRemoteAnswer { sdp } => self.apply_remote_answer(sdp).await,
            SessionCommand::AddRemoteCandidate { candidate } => {
                self.add_remote_candidate(candidate).await
            }
            SessionCommand::AddTrack(track) => {
                self.add_track(track).await;
                self.maybe_negotiate().await;
            }
            SessionCommand::RemoveTrack { track_id } => {
                self.remove_track(&track_id).await;
                self.maybe_negotiate().await;
            }
            SessionCommand::SetCodecPreference(preference) => {
                self.config.codec_preference = preference;
            }
            SessionCommand::SendData(message) => self.send_data(message).await,
            SessionCommand::Close => unreachable!("handled in run loop"),
        }
    }

    async fn handle_internal(&mut self, evt: InternalEvent) {
        match evt {
            InternalEvent::CandidateGenerated(candidate) => {
                self.emit(SessionEvent::Outbound(Envelope::IceCandidate {
                    target_id: self.remote.clone(),
                    sender_id: None,
                    candidate,
                }))
                .await;
            }
            InternalEvent::ConnectionState(state) => {
                debug!("Connection state for {}: {state:?}", self.remote);
                match state {
                    RTCPeerConnectionState::Failed => self.recover().await,
                    RTCPeerConnectionState::Disconnected => {
                        self.grace_deadline =
                            Some(Instant::now() + self.config.disconnect_grace);
                    }
                    RTCPeerConnectionState::Connected => {
                        self.grace_deadline = None;
                    }
                    _ => {}
                }
            }
            InternalEvent::DataChannelOpen(dc) => {
                debug!("Data channel open for {}", self.remote);
                self.data_channel = Some(dc);
            }
            InternalEvent::DataMessage(message) => {
                self.emit(SessionEvent::Data {
                    peer: self.remote.clone(),
                    message,
                })
                .await;
            }
            InternalEvent::RemoteTrack(track) => {
                info!(
                    "Remote track from {}: {:?}",
                    self.remote,
                    track.kind()
                );
                self.emit(SessionEvent::RemoteTrack {
                    peer: self.remote.clone(),
                    track,
                })
                .await;
            }
        }
    }

    /// Remote offer. In `Stable` (or before any exchange) this is the
    /// normal path; mid-negotiation it is glare, resolved by the fixed
    /// roles: the responder rolls back its pending local description,
    /// the initiator ignores the remote offer and lets its own stand.
    async fn apply_remote_offer(&mut self, sdp: String) {
        if self.state.offer_is_glare() {
            match self.role {
                Role::Initiator => {
                    debug!("Glare with {}: keeping local offer", self.remote);
                    return;
                }
                Role::Responder => {
                    debug!("Glare with {}: rolling back local offer", self.remote);
                    if let Err(e) = self.rollback().await {
                        // Applying the remote offer may still succeed.
                        warn!("Rollback with {} failed: {e}", self.remote);
                    }
                    // Local changes go out again once stable.
                    self.needs_offer = true;
                }
            }
        }

        let offer = match RTCSessionDescription::offer(sdp) {
            Ok(offer) => offer,
            Err(e) => {
                self.fault(format!("offer parse failed: {e}")).await;
                return;
            }
        };
        if let Err(e) = self.pc.set_remote_description(offer).await {
            self.fault(format!("setRemote(offer) failed: {e}")).await;
            return;
        }
        self.remote_description_set = true;
        self.flush_candidates().await;

        let answer = match self.pc.create_answer(None).await {
            Ok(answer) => answer,
            Err(e) => {
                self.fault(format!("createAnswer failed: {e}")).await;
                return;
            }
        };
        let sdp_out = answer.sdp.clone();
        if let Err(e) = self.pc.set_local_description(answer).await {
            self.fault(format!("setLocal(answer) failed: {e}")).await;
            return;
        }

        self.apply_codec_preferences().await;
        self.set_state(NegotiationState::Stable).await;
        self.emit(SessionEvent::Outbound(Envelope::Answer {
            target_id: self.remote.clone(),
            sender_id: None,
            sdp: sdp_out,
        }))
        .await;

        self.maybe_negotiate().await;
    }

    async fn apply_remote_answer(&mut self, sdp: String) {
        if self.state != NegotiationState::Offered {
            self.fault(format!("unexpected answer in {:?}", self.state))
                .await;
            return;
        }

        let answer = match RTCSessionDescription::answer(sdp) {
            Ok(answer) => answer,
            Err(e) => {
                self.fault(format!("answer parse failed: {e}")).await;
                return;
            }
        };
        if let Err(e) = self.pc.set_remote_description(answer).await {
            self.fault(format!("setRemote(answer) failed: {e}")).await;
            return;
        }
        self.remote_description_set = true;
        self.flush_candidates().await;
        self.apply_codec_preferences().await;
        self.set_state(NegotiationState::Stable).await;

        self.maybe_negotiate().await;
    }

    /// Candidates arriving before the remote description are buffered;
    /// application failures afterwards are non-fatal by design of ICE.
    async fn add_remote_candidate(&mut self, candidate: String) {
        if !self.remote_description_set {
            self.pending_candidates.push(candidate);
            return;
        }
        self.apply_candidate(candidate).await;
    }

    async fn flush_candidates(&mut self) {
        for candidate in std::mem::take(&mut self.pending_candidates) {
            self.apply_candidate(candidate).await;
        }
    }

    async fn apply_candidate(&self, candidate: String) {
        let parsed: RTCIceCandidateInit = match serde_json::from_str(&candidate) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("ICE candidate parse failed: {e}");
                return;
            }
        };
        if let Err(e) = self.pc.add_ice_candidate(parsed).await {
            warn!("ICE candidate rejected for {}: {e}", self.remote);
        }
    }

    async fn add_track(&mut self, track: LocalTrack) {
        let track_id = track.id();
        if self.senders.contains_key(&track_id) {
            return;
        }
        match self.pc.add_track(track.rtc()).await {
            Ok(sender) => {
                debug!("Track {track_id} attached for {}", self.remote);
                self.senders.insert(track_id, sender);
                self.apply_codec_preferences().await;
                self.needs_offer = true;
            }
            Err(e) => {
                self.fault(format!("addTrack({track_id}) failed: {e}")).await;
            }
        }
    }

    async fn remove_track(&mut self, track_id: &str) {
        let Some(sender) = self.senders.remove(track_id) else {
            return;
        };
        if let Err(e) = self.pc.remove_track(&sender).await {
            warn!("removeTrack({track_id}) failed for {}: {e}", self.remote);
        }
        self.needs_offer = true;
    }

    async fn send_data(&mut self, message: ChannelMessage) {
        let Some(dc) = &self.data_channel else {
            debug!("Data channel to {} not open; message dropped", self.remote);
            return;
        };
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                warn!("Data message serialize failed: {e}");
                return;
            }
        };
        if let Err(e) = dc.send_text(json).await {
            debug!("Data send to {} failed: {e}", self.remote);
        }
    }

    /// Produce a fresh offer when local changes are pending and the
    /// state machine permits one.
    async fn maybe_negotiate(&mut self) {
        if !self.needs_offer || !self.state.can_offer(self.role) {
            return;
        }
        self.state = NegotiationState::NeedsOffer;

        let offer = match self.pc.create_offer(None).await {
            Ok(offer) => offer,
            Err(e) => {
                self.fault(format!("createOffer failed: {e}")).await;
                return;
            }
        };
        let sdp = offer.sdp.clone();
        if let Err(e) = self.pc.set_local_description(offer).await {
            self.fault(format!("setLocal(offer) failed: {e}")).await;
            return;
        }

        self.needs_offer = false;
        self.set_state(NegotiationState::Offered).await;
        self.emit(SessionEvent::Outbound(Envelope::Offer {
            target_id: self.remote.clone(),
            sender_id: None,
            sdp,
        }))
        .await;
    }

    /// Discard the pending local description.
    async fn rollback(&mut self) -> Result<(), webrtc::Error> {
        let mut rollback = RTCSessionDescription::default();
        rollback.sdp_type = RTCSdpType::Rollback;
        self.pc.set_local_description(rollback).await?;
        self.state = NegotiationState::Stable;
        Ok(())
    }

    async fn apply_codec_preferences(&self) {
        let ordered = order_codecs(self.config.codec_preference, default_video_codecs());
        for transceiver in self.pc.get_transceivers().await {
            if transceiver.kind() != RTPCodecType::Video {
                continue;
            }
            if let Err(e) = transceiver.set_codec_preferences(ordered.clone()).await {
                debug!("Codec preference rejected: {e}");
            }
        }
    }

    async fn set_state(&mut self, state: NegotiationState) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.emit(SessionEvent::StateChanged {
            peer: self.remote.clone(),
            state,
        })
        .await;
    }

    async fn fault(&mut self, reason: String) {
        let error = EngineError::negotiation(&self.remote, reason);
        warn!("{error}");
        self.emit(SessionEvent::Fault {
            peer: self.remote.clone(),
            error,
        })
        .await;
    }

    /// Tear the transport down and hand the peer back to the controller
    /// for a rebuild with the same role.
    async fn recover(&mut self) {
        let _ = self.pc.close().await;
        self.senders.clear();
        self.data_channel = None;
        self.pending_candidates.clear();
        self.set_state(NegotiationState::Recovering).await;
        self.emit(SessionEvent::RecoveryNeeded {
            peer: self.remote.clone(),
        })
        .await;
    }

    async fn shutdown(&mut self) {
        let _ = self.pc.close().await;
        self.senders.clear();
        self.data_channel = None;
        self.set_state(NegotiationState::Closed).await;
        self.emit(SessionEvent::Closed {
            peer: self.remote.clone(),
        })
        .await;
        info!("Session with {} closed", self.remote);
    }

    async fn emit(&self, event: SessionEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("Controller gone; session event dropped");
        }
    }
}
