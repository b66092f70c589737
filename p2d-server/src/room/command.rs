use p2d_core::Envelope;
use tokio::sync::mpsc;

/// Identifies one WebSocket connection for the lifetime of the process.
pub type ConnectionId = u64;

/// Commands flowing from the connection handlers into the registry loop.
#[derive(Debug)]
pub enum RegistryCommand {
    /// A socket finished its upgrade; `tx` is its outbound frame queue.
    Connected {
        conn: ConnectionId,
        tx: mpsc::UnboundedSender<Envelope>,
    },

    /// A parsed envelope arrived from a connection.
    Inbound {
        conn: ConnectionId,
        envelope: Envelope,
    },

    /// The socket closed; treated as `Leave` for the connection's last
    /// known participant id.
    Closed { conn: ConnectionId },
}
