mod test_client;

pub use test_client::TestClient;

use axum::{routing::get, Router};
use p2d_server::{ws_handler, Registry};

/// Bind a full rendezvous server on an ephemeral port and return its
/// WebSocket URL.
pub async fn spawn_server() -> String {
    let registry = Registry::spawn();
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(registry);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("No local addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server died");
    });

    format!("ws://{addr}/ws")
}
