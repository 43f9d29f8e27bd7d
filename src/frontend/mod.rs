//! Client-facing side: WebSocket connections (optionally over TLS) and the
//! registry that lets routing reach them by id.

pub mod connection;
pub mod listener;
pub mod registry;

pub use connection::{ClientConnection, ClientEvent};
pub use listener::ClientListener;
pub use registry::ClientRegistry;
