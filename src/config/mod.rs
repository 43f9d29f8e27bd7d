pub mod cli;
#[allow(clippy::module_inception)]
pub mod config;
pub mod file;
pub mod types;

pub use cli::Args;
pub use config::{Config, parse_messaging_uri};
pub use file::FileConfig;
pub use types::{LogLevel, ReconnectMode};
