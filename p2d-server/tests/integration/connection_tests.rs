use crate::integration::init_tracing;
use crate::utils::{spawn_server, TestClient};
use p2d_core::Envelope;

#[tokio::test]
async fn first_member_gets_empty_existing() {
    init_tracing();
    let url = spawn_server().await;

    let mut client = TestClient::connect(&url).await.expect("connect");
    let ack = client.join("R", Some("A")).await.expect("join");

    match ack {
        Envelope::JoinAck {
            room_id,
            participant_id,
            existing,
        } => {
            assert_eq!(room_id.to_string(), "R");
            assert_eq!(participant_id.to_string(), "A");
            assert!(existing.is_empty());
        }
        other => panic!("Expected JoinAck, got {other:?}"),
    }
}

#[tokio::test]
async fn server_assigns_fresh_id_when_absent() {
    init_tracing();
    let url = spawn_server().await;

    let mut client = TestClient::connect(&url).await.expect("connect");
    let ack = client.join("R", None).await.expect("join");

    let assigned = match ack {
        Envelope::JoinAck { participant_id, .. } => participant_id,
        other => panic!("Expected JoinAck, got {other:?}"),
    };
    assert!(!assigned.to_string().is_empty());

    // The assigned id shows up in the next joiner's member list.
    let mut second = TestClient::connect(&url).await.expect("connect");
    let ack = second.join("R", Some("B")).await.expect("join");
    match ack {
        Envelope::JoinAck { existing, .. } => {
            assert_eq!(existing.len(), 1);
            assert_eq!(existing[0].id, assigned);
        }
        other => panic!("Expected JoinAck, got {other:?}"),
    }
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    init_tracing();
    let url = spawn_server().await;

    let mut client = TestClient::connect(&url).await.expect("connect");
    client.send(&Envelope::Ping).await.expect("send");
    assert_eq!(client.recv().await.expect("recv"), Envelope::Pong);
}

#[tokio::test]
async fn socket_close_is_treated_as_leave() {
    init_tracing();
    let url = spawn_server().await;

    let mut a = TestClient::connect(&url).await.expect("connect a");
    a.join("R", Some("A")).await.expect("join a");

    let mut b = TestClient::connect(&url).await.expect("connect b");
    b.join("R", Some("B")).await.expect("join b");

    match a.recv().await.expect("peer joined") {
        Envelope::PeerJoined { participant_id, .. } => {
            assert_eq!(participant_id.to_string(), "B")
        }
        other => panic!("Expected PeerJoined, got {other:?}"),
    }

    b.close().await.expect("close b");

    match a.recv().await.expect("peer left") {
        Envelope::PeerLeft { participant_id } => assert_eq!(participant_id.to_string(), "B"),
        other => panic!("Expected PeerLeft, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_frames_do_not_kill_the_connection() {
    init_tracing();
    let url = spawn_server().await;

    let mut client = TestClient::connect(&url).await.expect("connect");
    client.join("R", Some("A")).await.expect("join");

    client.send_raw("{not json").await.expect("send raw");
    client
        .send_raw(r#"{"type":"Hijack"}"#)
        .await
        .expect("send raw");

    // Still alive and routed.
    client.send(&Envelope::Ping).await.expect("send ping");
    assert_eq!(client.recv().await.expect("recv"), Envelope::Pong);
}
