use crate::room::{RegistryCommand, RegistryHandle};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use p2d_core::Envelope;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(registry): State<RegistryHandle>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

async fn handle_socket(socket: WebSocket, registry: RegistryHandle) {
    let conn = registry.allocate_connection();
    info!("New WebSocket connection: {conn}");

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    registry
        .send(RegistryCommand::Connected {
            conn,
            tx: tx.clone(),
        })
        .await;

    let mut send_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let json = match serde_json::to_string(&envelope) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize envelope: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn({
        let registry = registry.clone();

        async move {
            while let Some(Ok(msg)) = receiver.next().await {
                match msg {
                    Message::Text(text) => match serde_json::from_str::<Envelope>(&text) {
                        // Heartbeat is answered on the connection itself;
                        // the registry never sees it.
                        Ok(Envelope::Ping) => {
                            let _ = tx.send(Envelope::Pong);
                        }
                        Ok(envelope) => {
                            registry
                                .send(RegistryCommand::Inbound { conn, envelope })
                                .await;
                        }
                        Err(e) => {
                            warn!("Malformed envelope from connection {conn}: {e}");
                        }
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }

            debug!("Socket read loop ended for connection {conn}");
            registry.send(RegistryCommand::Closed { conn }).await;
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    info!("WebSocket disconnected: {conn}");
}
