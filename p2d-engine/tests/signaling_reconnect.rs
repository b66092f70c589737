use futures::{SinkExt, StreamExt};
use p2d_engine::config::{EngineConfig, HeartbeatConfig, ReconnectConfig};
use p2d_engine::signaling::{SignalingClient, SignalingEvent};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::Level;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn fast_config(url: String) -> EngineConfig {
    EngineConfig {
        signaling_url: url,
        ice_servers: vec![],
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter: 0.0,
        },
        heartbeat: HeartbeatConfig {
            ping_interval: Duration::from_millis(100),
            idle_timeout: Duration::from_millis(500),
        },
        play_remote_audio: false,
        ..Default::default()
    }
}

/// WS server that accepts connections and never sends a frame back.
async fn spawn_silent_server() -> (String, mpsc::UnboundedReceiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let _ = accept_tx.send(());
            tokio::spawn(async move {
                if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                    while let Some(msg) = ws.next().await {
                        if msg.is_err() {
                            break;
                        }
                    }
                }
            });
        }
    });

    (format!("ws://{addr}"), accept_rx)
}

/// WS server that answers every text frame with a `Pong` envelope.
async fn spawn_pong_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    if msg.is_text() {
                        let pong = r#"{"type":"Pong"}"#.to_owned();
                        if ws.send(Message::Text(pong.into())).await.is_err() {
                            break;
                        }
                    }
                }
            });
        }
    });

    format!("ws://{addr}")
}

async fn next_event(rx: &mut mpsc::Receiver<SignalingEvent>, within: Duration) -> SignalingEvent {
    tokio::time::timeout(within, rx.recv())
        .await
        .expect("timed out waiting for a signaling event")
        .expect("signaling task gone")
}

#[tokio::test]
async fn silent_link_is_declared_dead_and_reconnected() {
    init_tracing();
    let (url, mut accepts) = spawn_silent_server().await;

    let (_client, mut events) = SignalingClient::spawn(&fast_config(url)).unwrap();

    assert_eq!(
        next_event(&mut events, Duration::from_secs(2)).await,
        SignalingEvent::Connected
    );
    accepts.recv().await.unwrap();

    // No inbound traffic: dead within the idle timeout plus a check
    // tick, then a fresh connection attempt.
    assert_eq!(
        next_event(&mut events, Duration::from_secs(3)).await,
        SignalingEvent::Disconnected
    );
    assert_eq!(
        next_event(&mut events, Duration::from_secs(3)).await,
        SignalingEvent::Connected
    );
    accepts.recv().await.unwrap();
}

#[tokio::test]
async fn steady_pong_flow_keeps_the_link_up() {
    init_tracing();
    let url = spawn_pong_server().await;

    let (_client, mut events) = SignalingClient::spawn(&fast_config(url)).unwrap();
    assert_eq!(
        next_event(&mut events, Duration::from_secs(2)).await,
        SignalingEvent::Connected
    );

    // Far longer than the idle timeout; heartbeat answers keep it alive.
    let quiet = tokio::time::timeout(Duration::from_millis(1500), events.recv()).await;
    match quiet {
        Err(_) => {}
        Ok(evt) => panic!("Expected a quiet healthy link, got {evt:?}"),
    }
}

#[tokio::test]
async fn disconnect_is_idempotent_and_prompt() {
    init_tracing();
    let url = spawn_pong_server().await;

    let (client, mut events) = SignalingClient::spawn(&fast_config(url)).unwrap();
    assert_eq!(
        next_event(&mut events, Duration::from_secs(2)).await,
        SignalingEvent::Connected
    );

    client.disconnect();
    client.disconnect();

    assert_eq!(
        next_event(&mut events, Duration::from_secs(2)).await,
        SignalingEvent::Disconnected
    );

    // The task is gone for good: no reconnect follows.
    let quiet = tokio::time::timeout(Duration::from_millis(800), events.recv()).await;
    match quiet {
        Err(_) | Ok(None) => {}
        Ok(Some(evt)) => panic!("Expected no further events, got {evt:?}"),
    }
}

#[tokio::test]
async fn connect_failure_backs_off_and_recovers() {
    init_tracing();

    // Reserve an address, then drop the listener so the first attempts
    // are refused.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (_client, mut events) = SignalingClient::spawn(&fast_config(format!("ws://{addr}"))).unwrap();

    // Let a few attempts fail, then bring the server up on that port.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let listener = TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                    while let Some(Ok(msg)) = ws.next().await {
                        if msg.is_text() {
                            let pong = r#"{"type":"Pong"}"#.to_owned();
                            if ws.send(Message::Text(pong.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    assert_eq!(
        next_event(&mut events, Duration::from_secs(5)).await,
        SignalingEvent::Connected
    );
}
