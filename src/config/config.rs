use clap::Parser;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use secrecy::SecretString;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use crate::bus::BusEndpoint;
use crate::errors::ConfigError;
use crate::gateway::ReconnectPolicy;
use crate::shared_types::InstanceIdentity;
use crate::tls::TlsFiles;

use super::{
    cli::Args,
    file::FileConfig,
    types::{LogLevel, ReconnectMode},
};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MESSAGING_URI: &str = "redis://127.0.0.1:6379";
const DEFAULT_BUS_PORT: u16 = 6379;
const DEFAULT_RECONNECT_INITIAL: Duration = Duration::from_millis(500);
const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(30);

// -----------------------------------------------------------------------------
// ----- Global Singleton ------------------------------------------------------

static ROOT_CONFIG: OnceCell<Arc<RwLock<Config>>> = OnceCell::new();

// -----------------------------------------------------------------------------
// ----- Config ----------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub bus: BusEndpoint,
    pub log_level: LogLevel,
    pub reconnect: ReconnectPolicy,
    pub instance_id: String,
    pub tls: Option<TlsFiles>,
}

// -----------------------------------------------------------------------------
// ----- Config: Static --------------------------------------------------------

impl Config {
    /// Parse CLI/ENV, read the config file if one was named, and publish the
    /// result. Async because the file read is.
    pub async fn init() -> Result<(), ConfigError> {
        let args = Args::parse();

        let file = match args.config_file.as_deref() {
            Some(path) => FileConfig::load(path).await?,
            None => FileConfig::default(),
        };

        let next = Self::resolve(args, file)?;

        match ROOT_CONFIG.get() {
            Some(handle) => *handle.write() = next,
            None => {
                let _ = ROOT_CONFIG.set(Arc::new(RwLock::new(next)));
            }
        }

        Ok(())
    }

    pub fn snapshot() -> Result<Config, ConfigError> {
        ROOT_CONFIG
            .get()
            .map(|handle| handle.read().clone())
            .ok_or(ConfigError::NotInitialized)
    }

    /// CLI/ENV wins over the file, the file wins over defaults.
    pub fn resolve(args: Args, file: FileConfig) -> Result<Config, ConfigError> {
        let host = args.host.or(file.host).unwrap_or(DEFAULT_HOST);
        let port = args.port.or(file.port).unwrap_or(DEFAULT_PORT);

        let uri = args
            .messaging_uri
            .or(file.messaging_uri)
            .unwrap_or_else(|| DEFAULT_MESSAGING_URI.to_string());
        let mut bus = parse_messaging_uri(&uri)?;
        if let Some(password) = args.bus_password.or(file.bus_password) {
            bus = bus.with_password(SecretString::new(password.into_boxed_str()));
        }

        let log_level = args.log_level.or(file.log_level).unwrap_or(LogLevel::Info);

        let initial = match args.reconnect_initial {
            Some(d) => d,
            None => duration_or(file.reconnect_initial.as_deref(), "reconnect_initial", DEFAULT_RECONNECT_INITIAL)?,
        };
        let max = match args.reconnect_max {
            Some(d) => d,
            None => duration_or(file.reconnect_max.as_deref(), "reconnect_max", DEFAULT_RECONNECT_MAX)?,
        };
        let reconnect = match args.reconnect.or(file.reconnect).unwrap_or(ReconnectMode::Backoff) {
            ReconnectMode::Never => ReconnectPolicy::Never,
            ReconnectMode::Backoff if initial > max => {
                return Err(ConfigError::ReconnectRange { initial, max });
            }
            ReconnectMode::Backoff => ReconnectPolicy::Backoff { initial, max },
        };

        let instance_id = match args.instance_id.or(file.instance_id) {
            Some(id) if id.trim().is_empty() => return Err(ConfigError::EmptyInstanceId),
            Some(id) => id,
            None => InstanceIdentity::random_instance_id(),
        };

        let tls = match (args.tls_cert.or(file.tls_cert), args.tls_key.or(file.tls_key)) {
            (Some(cert), Some(key)) => Some(TlsFiles { cert, key }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteTls),
        };

        Ok(Config {
            listen_addr: SocketAddr::from((host, port)),
            bus,
            log_level,
            reconnect,
            instance_id,
            tls,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Messaging URI ---------------------------------------------------------

/// `<scheme>://<host>[:<port>]`, port defaulting to 6379. IPv6 hosts go in
/// brackets.
pub fn parse_messaging_uri(uri: &str) -> Result<BusEndpoint, ConfigError> {
    let invalid = |reason| ConfigError::MessagingUri {
        uri: uri.to_string(),
        reason,
    };

    let (scheme, rest) = uri.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
    if scheme.is_empty() {
        return Err(invalid("missing scheme"));
    }

    let authority = rest.strip_suffix('/').unwrap_or(rest);
    if authority.contains('/') || authority.contains('@') {
        return Err(invalid("expected only host and port"));
    }

    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| invalid("unclosed '['"))?;
        let port = match tail {
            "" => None,
            _ => Some(tail.strip_prefix(':').ok_or_else(|| invalid("junk after host"))?),
        };
        (host, port)
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host.is_empty() {
        return Err(invalid("missing host"));
    }

    let port = match port {
        Some(p) => p.parse::<u16>().map_err(|_| invalid("invalid port"))?,
        None => DEFAULT_BUS_PORT,
    };

    Ok(BusEndpoint::new(host, port))
}

// -----------------------------------------------------------------------------
// ----- Private Utils ---------------------------------------------------------

fn duration_or(
    raw: Option<&str>,
    field: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match raw {
        Some(raw) => humantime::parse_duration(raw)
            .map_err(|source| ConfigError::Duration { field, source }),
        None => Ok(default),
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
