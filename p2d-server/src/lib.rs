pub mod room;
pub mod signaling;

pub use room::{Registry, RegistryCommand, RegistryHandle};
pub use signaling::ws_handler;
