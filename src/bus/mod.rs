// bus/mod.rs
//! Everything that talks to the publish/subscribe bus: the wire codec, a
//! single TCP link, and the broker that pairs a publish link with a
//! subscribe link.

pub mod broker;
pub(crate) mod link;
pub mod resp;

pub use broker::{Broker, BrokerEvent, BrokerHandle};

use secrecy::SecretString;

// -----------------------------------------------------------------------------
// ----- BusEndpoint -----------------------------------------------------------

/// Where the bus lives, plus the optional password sent as `AUTH` on every
/// link before anything else.
#[derive(Debug, Clone)]
pub struct BusEndpoint {
    pub host: String,
    pub port: u16,
    pub password: Option<SecretString>,
}

impl BusEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
        }
    }

    pub fn with_password(mut self, password: SecretString) -> Self {
        self.password = Some(password);
        self
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
