mod peer_session;
mod state;

pub use peer_session::{PeerSession, SessionCommand, SessionConfig, SessionEvent};
pub use state::{NegotiationState, Role};
