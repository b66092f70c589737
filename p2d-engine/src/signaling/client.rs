use crate::config::{EngineConfig, HeartbeatConfig, ReconnectConfig};
use crate::error::EngineError;
use crate::signaling::backoff::Backoff;
use crate::signaling::event::SignalingEvent;
use futures::{SinkExt, StreamExt};
use p2d_core::Envelope;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug)]
enum ClientCommand {
    Send(Envelope),
    Disconnect,
}

/// Reliable, ordered, typed duplex channel over a WebSocket that is
/// allowed to die. Reconnects with capped jittered backoff; declares
/// the link dead after `idle_timeout` without inbound traffic. The
/// caller is responsible for re-joining its room after `Connected`;
/// nothing sent before a disconnect is replayed.
pub struct SignalingClient {
    cmd_tx: mpsc::UnboundedSender<ClientCommand>,
}

impl SignalingClient {
    /// Spawn the transport task. Events arrive on the returned receiver
    /// in delivery order.
    pub fn spawn(
        config: &EngineConfig,
    ) -> Result<(Self, mpsc::Receiver<SignalingEvent>), EngineError> {
        // Reject bad URLs up front; the reconnect loop assumes the
        // address itself is valid.
        Url::parse(&config.signaling_url).map_err(EngineError::transport)?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(256);

        tokio::spawn(run(
            config.signaling_url.clone(),
            config.reconnect.clone(),
            config.heartbeat.clone(),
            config.outbound_buffer,
            cmd_rx,
            event_tx,
        ));

        Ok((Self { cmd_tx }, event_rx))
    }

    pub fn send(&self, envelope: Envelope) -> Result<(), EngineError> {
        self.cmd_tx
            .send(ClientCommand::Send(envelope))
            .map_err(|_| EngineError::Transport("signaling task stopped".into()))
    }

    /// Idempotent; the transport task winds down promptly and any
    /// in-flight sends may be lost.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Disconnect);
    }
}

fn push_bounded(queue: &mut VecDeque<Envelope>, envelope: Envelope, cap: usize) {
    while queue.len() >= cap {
        queue.pop_front();
    }
    queue.push_back(envelope);
}

async fn run(
    url: String,
    reconnect: ReconnectConfig,
    heartbeat: HeartbeatConfig,
    buffer_cap: usize,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientCommand>,
    event_tx: mpsc::Sender<SignalingEvent>,
) {
    let mut backoff = Backoff::new(&reconnect);
    let mut queue: VecDeque<Envelope> = VecDeque::new();

    loop {
        // Connect attempt, interruptible by a disconnect request.
        let connect = connect_async(url.clone());
        tokio::pin!(connect);

        let attempt = loop {
            tokio::select! {
                res = &mut connect => break res,
                cmd = cmd_rx.recv() => match cmd {
                    Some(ClientCommand::Send(env)) => push_bounded(&mut queue, env, buffer_cap),
                    Some(ClientCommand::Disconnect) | None => {
                        let _ = event_tx.send(SignalingEvent::Disconnected).await;
                        return;
                    }
                },
            }
        };

        let stream = match attempt {
            Ok((stream, _)) => stream,
            Err(e) => {
                let delay = backoff.next();
                warn!("Signaling connect failed: {e}; retrying in {delay:?}");
                let sleep = tokio::time::sleep(delay);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = &mut sleep => break,
                        cmd = cmd_rx.recv() => match cmd {
                            Some(ClientCommand::Send(env)) => {
                                push_bounded(&mut queue, env, buffer_cap)
                            }
                            Some(ClientCommand::Disconnect) | None => {
                                let _ = event_tx.send(SignalingEvent::Disconnected).await;
                                return;
                            }
                        },
                    }
                }
                continue;
            }
        };

        info!("Signaling connected to {url}");
        backoff.reset();
        let _ = event_tx.send(SignalingEvent::Connected).await;

        let (mut write, mut read) = stream.split();

        // Whatever accumulated while the link was down goes out first.
        let mut flush_failed = false;
        for envelope in queue.drain(..) {
            if send_envelope(&mut write, &envelope).await.is_err() {
                flush_failed = true;
                break;
            }
        }
        if flush_failed {
            let _ = event_tx.send(SignalingEvent::Disconnected).await;
            continue;
        }

        let mut ping = tokio::time::interval(heartbeat.ping_interval);
        let mut liveness = tokio::time::interval(Duration::from_secs(1));
        let mut last_inbound = Instant::now();

        let disconnected_by_user = loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Close(_))) | None => break false,
                    Some(Ok(frame)) => {
                        last_inbound = Instant::now();
                        if let Message::Text(text) = frame {
                            match serde_json::from_str::<Envelope>(&text) {
                                // Heartbeat terminates here; it already
                                // refreshed the liveness deadline.
                                Ok(Envelope::Ping) | Ok(Envelope::Pong) => {}
                                Ok(envelope) => {
                                    let _ = event_tx
                                        .send(SignalingEvent::Envelope(envelope))
                                        .await;
                                }
                                Err(e) => warn!("Malformed envelope dropped: {e}"),
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Signaling read error: {e}");
                        break false;
                    }
                },

                cmd = cmd_rx.recv() => match cmd {
                    Some(ClientCommand::Send(envelope)) => {
                        if send_envelope(&mut write, &envelope).await.is_err() {
                            // The frame is lost with the link; the next
                            // connection starts from a clean queue.
                            break false;
                        }
                    }
                    Some(ClientCommand::Disconnect) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        break true;
                    }
                },

                _ = ping.tick() => {
                    if send_envelope(&mut write, &Envelope::Ping).await.is_err() {
                        break false;
                    }
                },

                _ = liveness.tick() => {
                    if last_inbound.elapsed() > heartbeat.idle_timeout {
                        warn!(
                            "No inbound traffic for {:?}; declaring link dead",
                            heartbeat.idle_timeout
                        );
                        break false;
                    }
                },
            }
        };

        let _ = event_tx.send(SignalingEvent::Disconnected).await;
        if disconnected_by_user {
            debug!("Signaling client stopped by disconnect");
            return;
        }
    }
}

async fn send_envelope<S>(write: &mut S, envelope: &Envelope) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let json = match serde_json::to_string(envelope) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize envelope: {e}");
            return Ok(());
        }
    };
    write.send(Message::Text(json.into())).await.map_err(|_| ())
}
