pub mod model {
    pub use p2d_core::*;
}

#[cfg(feature = "server")]
pub mod server {
    pub use p2d_server::*;
}

#[cfg(feature = "engine")]
pub mod engine {
    pub use p2d_engine::*;
}
