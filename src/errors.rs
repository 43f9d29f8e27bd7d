use std::{io, net::SocketAddr, path::PathBuf, time::Duration};
use thiserror::Error;

use crate::routing::message::MessageError;
use crate::shared_types::LinkRole;
use crate::tls::TlsError;

// -----------------------------------------------------------------------------
// ----- BrokerError -----------------------------------------------------------

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("message broker is not connected")]
    NotConnected,

    #[error("{0} link to the message broker is closed")]
    LinkClosed(LinkRole),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

// -----------------------------------------------------------------------------
// ----- RoutingError ----------------------------------------------------------

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("malformed message: {0}")]
    Malformed(#[from] MessageError),

    #[error("message of type {kind} has no service to route to")]
    MissingService { kind: String },

    #[error("{kind} message is missing field '{field}'")]
    MissingField { kind: String, field: &'static str },

    #[error("unexpected message type {kind} on channel {channel}")]
    UnexpectedControl { kind: String, channel: String },

    #[error("unknown channel {0}")]
    UnknownChannel(String),

    #[error("client id not found for session id={0}")]
    UnknownSession(String),

    #[error(transparent)]
    Bus(#[from] BrokerError),
}

impl RoutingError {
    /// Peer sent something we do not understand. Everything else means our
    /// own state or the bus is off.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            RoutingError::Malformed(_)
                | RoutingError::MissingService { .. }
                | RoutingError::MissingField { .. }
                | RoutingError::UnexpectedControl { .. }
                | RoutingError::UnknownChannel(_)
        )
    }
}

// -----------------------------------------------------------------------------
// ----- ConfigError -----------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read error for {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("toml parse error: {source}")]
    Toml { source: toml::de::Error },

    #[error("invalid messaging uri '{uri}': {reason}")]
    MessagingUri { uri: String, reason: &'static str },

    #[error("invalid duration for {field}: {source}")]
    Duration {
        field: &'static str,
        source: humantime::DurationError,
    },

    #[error("reconnect initial delay {initial:?} exceeds max {max:?}")]
    ReconnectRange { initial: Duration, max: Duration },

    #[error("tls needs both a certificate and a key")]
    IncompleteTls,

    #[error("instance id must not be empty")]
    EmptyInstanceId,

    #[error("config not initialized; call Config::init().await first")]
    NotInitialized,
}

// -----------------------------------------------------------------------------
// ----- GatewayError ----------------------------------------------------------

/// Startup failures. These are the only errors that stop the process.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("tls setup failed: {0}")]
    Tls(#[from] TlsError),
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
