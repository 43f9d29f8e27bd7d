pub mod channel;
pub mod engine;
pub mod message;
pub mod session_table;

pub use channel::{InboundChannel, ServiceRoute, self_channel, session_channel};
pub use engine::{BusPublisher, ConnectionRegistry, RoutingEngine};
pub use message::{Message, MessageKind};
pub use session_table::{SessionEntry, SessionTable};
