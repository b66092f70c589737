mod command;
mod controller;
mod observer;

pub use command::MeshCommand;
pub use controller::{MeshController, MeshHandle};
pub use observer::{ConnectionState, MeshObserver};
