use clap::Parser;
use std::{net::IpAddr, path::PathBuf, time::Duration};

use super::types::{LogLevel, ReconnectMode};

// -----------------------------------------------------------------------------
// ----- Args ------------------------------------------------------------------

/// Everything is optional here; unset values fall back to the config file and
/// then to defaults.
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "siorelay", version, about = "WebSocket signaling gateway over a pub/sub bus")]
pub struct Args {
    // IPv4 or IPv6 literal (e.g., 0.0.0.0, 127.0.0.1, ::, ::1).
    #[arg(long = "host", short = 'H', env = "SIORELAY_HOST")]
    pub host: Option<IpAddr>,

    #[arg(long = "port", short = 'p', env = "SIORELAY_PORT")]
    pub port: Option<u16>,

    // <scheme>://<host>[:<port>]
    #[arg(long = "messaging-uri", env = "SIORELAY_MESSAGING_URI")]
    pub messaging_uri: Option<String>,

    #[arg(long = "bus-password", env = "SIORELAY_BUS_PASSWORD", hide_env_values = true)]
    pub bus_password: Option<String>,

    #[arg(long = "log", env = "SIORELAY_LOG")]
    pub log_level: Option<LogLevel>,

    // Optional TOML file.
    #[arg(long = "config", env = "SIORELAY_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    #[arg(long = "reconnect", env = "SIORELAY_RECONNECT")]
    pub reconnect: Option<ReconnectMode>,

    #[arg(long = "reconnect-initial", value_parser = humantime::parse_duration)]
    pub reconnect_initial: Option<Duration>,

    #[arg(long = "reconnect-max", value_parser = humantime::parse_duration)]
    pub reconnect_max: Option<Duration>,

    #[arg(long = "instance-id", env = "SIORELAY_INSTANCE_ID")]
    pub instance_id: Option<String>,

    #[arg(long = "tls-cert", env = "SIORELAY_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    #[arg(long = "tls-key", env = "SIORELAY_TLS_KEY")]
    pub tls_key: Option<PathBuf>,
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
