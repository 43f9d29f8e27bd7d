pub mod broker_state;
pub mod connection_id;
pub mod instance_identity;

pub use broker_state::{BrokerState, LinkRole, LinkStatus};
pub use connection_id::ConnectionId;
pub use instance_identity::InstanceIdentity;
