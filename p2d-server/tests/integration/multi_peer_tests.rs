use crate::integration::init_tracing;
use crate::utils::{spawn_server, TestClient};
use p2d_core::Envelope;

fn ack_existing(ack: &Envelope) -> Vec<String> {
    match ack {
        Envelope::JoinAck { existing, .. } => {
            existing.iter().map(|p| p.id.to_string()).collect()
        }
        other => panic!("Expected JoinAck, got {other:?}"),
    }
}

#[tokio::test]
async fn existing_lists_members_in_join_order() {
    init_tracing();
    let url = spawn_server().await;

    let mut a = TestClient::connect(&url).await.expect("connect a");
    let ack = a.join("R", Some("A")).await.expect("join a");
    assert!(ack_existing(&ack).is_empty());

    let mut b = TestClient::connect(&url).await.expect("connect b");
    let ack = b.join("R", Some("B")).await.expect("join b");
    assert_eq!(ack_existing(&ack), ["A"]);
    a.recv().await.expect("A sees B");

    let mut c = TestClient::connect(&url).await.expect("connect c");
    let ack = c.join("R", Some("C")).await.expect("join c");
    assert_eq!(ack_existing(&ack), ["A", "B"]);

    // Both prior members learn about C.
    match a.recv().await.expect("A sees C") {
        Envelope::PeerJoined { participant_id, .. } => {
            assert_eq!(participant_id.to_string(), "C")
        }
        other => panic!("Expected PeerJoined, got {other:?}"),
    }
    match b.recv().await.expect("B sees C") {
        Envelope::PeerJoined { participant_id, .. } => {
            assert_eq!(participant_id.to_string(), "C")
        }
        other => panic!("Expected PeerJoined, got {other:?}"),
    }
}

#[tokio::test]
async fn rejoin_on_same_connection_changes_nothing() {
    init_tracing();
    let url = spawn_server().await;

    let mut a = TestClient::connect(&url).await.expect("connect a");
    a.join("R", Some("A")).await.expect("join a");
    let mut b = TestClient::connect(&url).await.expect("connect b");
    b.join("R", Some("B")).await.expect("join b");
    a.recv().await.expect("A sees B");

    // Same room, same id, same socket: fresh ack, unchanged membership.
    let ack = a.join("R", Some("A")).await.expect("rejoin a");
    assert_eq!(ack_existing(&ack), ["B"]);

    b.expect_silence(300)
        .await
        .expect("B must not see a membership change");
}

#[tokio::test]
async fn switching_rooms_leaves_the_first() {
    init_tracing();
    let url = spawn_server().await;

    let mut a = TestClient::connect(&url).await.expect("connect a");
    a.join("R1", Some("A")).await.expect("join a");
    let mut b = TestClient::connect(&url).await.expect("connect b");
    b.join("R1", Some("B")).await.expect("join b");
    a.recv().await.expect("A sees B");

    let ack = b.join("R2", Some("B")).await.expect("switch b");
    assert!(ack_existing(&ack).is_empty());

    match a.recv().await.expect("A sees B leave") {
        Envelope::PeerLeft { participant_id } => assert_eq!(participant_id.to_string(), "B"),
        other => panic!("Expected PeerLeft, got {other:?}"),
    }
}

#[tokio::test]
async fn rejoin_from_new_connection_evicts_stale_membership() {
    init_tracing();
    let url = spawn_server().await;

    let mut a_old = TestClient::connect(&url).await.expect("connect a");
    a_old.join("R", Some("A")).await.expect("join a");
    let mut b = TestClient::connect(&url).await.expect("connect b");
    b.join("R", Some("B")).await.expect("join b");
    a_old.recv().await.expect("A sees B");

    // A's transport died without a close; it rejoins on a new socket
    // with the same identity.
    let mut a_new = TestClient::connect(&url).await.expect("connect a2");
    let ack = a_new.join("R", Some("A")).await.expect("rejoin a");
    assert_eq!(ack_existing(&ack), ["B"]);

    // B sees the stale membership fall away, then the rejoin.
    match b.recv().await.expect("peer left") {
        Envelope::PeerLeft { participant_id } => assert_eq!(participant_id.to_string(), "A"),
        other => panic!("Expected PeerLeft, got {other:?}"),
    }
    match b.recv().await.expect("peer joined") {
        Envelope::PeerJoined { participant_id, .. } => {
            assert_eq!(participant_id.to_string(), "A")
        }
        other => panic!("Expected PeerJoined, got {other:?}"),
    }

    // The participant id routes to the new connection.
    b.send(&Envelope::Offer {
        target_id: "A".into(),
        sender_id: None,
        sdp: "v=0".to_owned(),
    })
    .await
    .expect("send");
    assert!(matches!(
        a_new.recv().await.expect("offer"),
        Envelope::Offer { .. }
    ));
}

#[tokio::test]
async fn last_leave_deletes_the_room() {
    init_tracing();
    let url = spawn_server().await;

    let mut a = TestClient::connect(&url).await.expect("connect a");
    a.join("R", Some("A")).await.expect("join a");
    a.close().await.expect("close a");

    // Let the close make it through the registry loop.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    // A fresh joiner sees an implicitly re-created, empty room.
    let mut b = TestClient::connect(&url).await.expect("connect b");
    let ack = b.join("R", Some("B")).await.expect("join b");
    assert!(ack_existing(&ack).is_empty());
}
