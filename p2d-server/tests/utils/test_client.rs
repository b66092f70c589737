use anyhow::{bail, Context, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use p2d_core::{Envelope, ParticipantId, RoomId};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// One raw protocol client against the rendezvous server.
pub struct TestClient {
    write: WsWrite,
    read: WsRead,
}

impl TestClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _) = connect_async(url).await.context("WS connect failed")?;
        let (write, read) = stream.split();
        Ok(Self { write, read })
    }

    pub async fn send(&mut self, envelope: &Envelope) -> Result<()> {
        let json = serde_json::to_string(envelope)?;
        self.send_raw(&json).await
    }

    /// Put an arbitrary text frame on the wire, valid envelope or not.
    pub async fn send_raw(&mut self, text: &str) -> Result<()> {
        self.write
            .send(Message::Text(text.to_owned().into()))
            .await
            .context("WS send failed")?;
        Ok(())
    }

    /// Next envelope, with a deadline. Non-text frames are skipped.
    pub async fn recv(&mut self) -> Result<Envelope> {
        let deadline = Duration::from_secs(2);
        loop {
            let frame = tokio::time::timeout(deadline, self.read.next())
                .await
                .context("Timed out waiting for an envelope")?;
            match frame {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text).context("Bad envelope from server");
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => bail!("WS read error: {e}"),
                None => bail!("Connection closed"),
            }
        }
    }

    /// Assert nothing arrives for a while. Used for silent-drop checks.
    pub async fn expect_silence(&mut self, for_ms: u64) -> Result<()> {
        match tokio::time::timeout(Duration::from_millis(for_ms), self.read.next()).await {
            Err(_) => Ok(()),
            Ok(Some(Ok(frame))) => bail!("Expected silence, got {frame:?}"),
            Ok(Some(Err(e))) => bail!("WS read error: {e}"),
            Ok(None) => bail!("Connection closed"),
        }
    }

    /// Join a room and return the `JoinAck`.
    pub async fn join(&mut self, room: &str, id: Option<&str>) -> Result<Envelope> {
        self.send(&Envelope::Join {
            room_id: RoomId::from(room),
            participant_id: id.map(ParticipantId::from),
            name: None,
        })
        .await?;

        let ack = self.recv().await?;
        if !matches!(ack, Envelope::JoinAck { .. }) {
            bail!("Expected JoinAck, got {ack:?}");
        }
        Ok(ack)
    }

    pub async fn close(mut self) -> Result<()> {
        self.write
            .send(Message::Close(None))
            .await
            .context("WS close failed")?;
        Ok(())
    }
}
