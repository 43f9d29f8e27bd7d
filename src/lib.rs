pub mod bus;
pub mod config;
pub mod errors;
pub mod frontend;
pub mod gateway;
pub mod routing;
pub mod shared_types;
pub mod tls;

pub use config::Config;
pub use gateway::Gateway;
