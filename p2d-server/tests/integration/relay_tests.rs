use crate::integration::init_tracing;
use crate::utils::{spawn_server, TestClient};
use p2d_core::{Envelope, ParticipantId};

fn offer_to(target: &str, sdp: &str) -> Envelope {
    Envelope::Offer {
        target_id: ParticipantId::from(target),
        sender_id: None,
        sdp: sdp.to_owned(),
    }
}

#[tokio::test]
async fn offer_is_relayed_with_sender_injected() {
    init_tracing();
    let url = spawn_server().await;

    let mut a = TestClient::connect(&url).await.expect("connect a");
    a.join("R", Some("A")).await.expect("join a");
    let mut b = TestClient::connect(&url).await.expect("connect b");
    b.join("R", Some("B")).await.expect("join b");
    a.recv().await.expect("peer joined");

    let sdp = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\n";
    b.send(&offer_to("A", sdp)).await.expect("send offer");

    match a.recv().await.expect("offer") {
        Envelope::Offer {
            target_id,
            sender_id,
            sdp: relayed,
        } => {
            assert_eq!(target_id.to_string(), "A");
            assert_eq!(sender_id, Some(ParticipantId::from("B")));
            // Payload is untouched by the relay.
            assert_eq!(relayed, sdp);
        }
        other => panic!("Expected Offer, got {other:?}"),
    }
}

#[tokio::test]
async fn sender_supplied_sender_id_is_overwritten() {
    init_tracing();
    let url = spawn_server().await;

    let mut a = TestClient::connect(&url).await.expect("connect a");
    a.join("R", Some("A")).await.expect("join a");
    let mut b = TestClient::connect(&url).await.expect("connect b");
    b.join("R", Some("B")).await.expect("join b");
    a.recv().await.expect("peer joined");

    // B lies about who it is; the server stamps the truth.
    b.send(&Envelope::Answer {
        target_id: ParticipantId::from("A"),
        sender_id: Some(ParticipantId::from("C")),
        sdp: "v=0".to_owned(),
    })
    .await
    .expect("send");

    match a.recv().await.expect("answer") {
        Envelope::Answer { sender_id, .. } => {
            assert_eq!(sender_id, Some(ParticipantId::from("B")));
        }
        other => panic!("Expected Answer, got {other:?}"),
    }
}

#[tokio::test]
async fn relay_stays_within_the_senders_room() {
    init_tracing();
    let url = spawn_server().await;

    let mut a = TestClient::connect(&url).await.expect("connect a");
    a.join("R1", Some("A")).await.expect("join a");
    let mut c = TestClient::connect(&url).await.expect("connect c");
    c.join("R2", Some("C")).await.expect("join c");

    a.send(&offer_to("C", "v=0")).await.expect("send");
    c.expect_silence(300).await.expect("C must see nothing");
}

#[tokio::test]
async fn relay_to_absent_peer_is_silently_dropped() {
    init_tracing();
    let url = spawn_server().await;

    let mut a = TestClient::connect(&url).await.expect("connect a");
    a.join("R", Some("A")).await.expect("join a");

    a.send(&offer_to("ghost", "v=0")).await.expect("send");

    // Not an error: the connection keeps working.
    a.send(&Envelope::Ping).await.expect("ping");
    assert_eq!(a.recv().await.expect("recv"), Envelope::Pong);
}

#[tokio::test]
async fn ice_candidates_flow_both_ways() {
    init_tracing();
    let url = spawn_server().await;

    let mut a = TestClient::connect(&url).await.expect("connect a");
    a.join("R", Some("A")).await.expect("join a");
    let mut b = TestClient::connect(&url).await.expect("connect b");
    b.join("R", Some("B")).await.expect("join b");
    a.recv().await.expect("peer joined");

    let candidate = r#"{"candidate":"candidate:1 1 udp 2130706431 127.0.0.1 54321 typ host"}"#;
    a.send(&Envelope::IceCandidate {
        target_id: ParticipantId::from("B"),
        sender_id: None,
        candidate: candidate.to_owned(),
    })
    .await
    .expect("send");

    match b.recv().await.expect("candidate") {
        Envelope::IceCandidate {
            sender_id,
            candidate: relayed,
            ..
        } => {
            assert_eq!(sender_id, Some(ParticipantId::from("A")));
            assert_eq!(relayed, candidate);
        }
        other => panic!("Expected IceCandidate, got {other:?}"),
    }

    b.send(&Envelope::IceCandidate {
        target_id: ParticipantId::from("A"),
        sender_id: None,
        candidate: candidate.to_owned(),
    })
    .await
    .expect("send");
    assert!(matches!(
        a.recv().await.expect("candidate"),
        Envelope::IceCandidate { .. }
    ));
}

#[tokio::test]
async fn peer_that_left_no_longer_receives() {
    init_tracing();
    let url = spawn_server().await;

    let mut a = TestClient::connect(&url).await.expect("connect a");
    a.join("R", Some("A")).await.expect("join a");
    let mut b = TestClient::connect(&url).await.expect("connect b");
    b.join("R", Some("B")).await.expect("join b");
    a.recv().await.expect("peer joined");

    b.send(&Envelope::Leave {
        participant_id: ParticipantId::from("B"),
    })
    .await
    .expect("leave");

    match a.recv().await.expect("peer left") {
        Envelope::PeerLeft { participant_id } => assert_eq!(participant_id.to_string(), "B"),
        other => panic!("Expected PeerLeft, got {other:?}"),
    }

    a.send(&offer_to("B", "v=0")).await.expect("send");
    b.expect_silence(300).await.expect("B must see nothing");
}
