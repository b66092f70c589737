mod backoff;
mod client;
mod event;

pub use backoff::Backoff;
pub use client::SignalingClient;
pub use event::SignalingEvent;
