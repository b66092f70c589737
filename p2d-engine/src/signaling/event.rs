use p2d_core::Envelope;

/// What the signaling client reports upward. Envelopes are delivered in
/// server order; connection-state changes interleave where they happen.
/// Heartbeat (`Ping`/`Pong`) never surfaces here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    Connected,
    Disconnected,
    Envelope(Envelope),
}
