//! Channel naming on the bus.
//!
//! | channel                        | meaning                          |
//! |--------------------------------|----------------------------------|
//! | `sio:<host>:<port>:<instance>` | this gateway's control inbox     |
//! | `sid:<sessionId>`              | data for one session             |
//! | `<service>`                    | a backend service inbox          |

use crate::shared_types::InstanceIdentity;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const SELF_CHANNEL_PREFIX: &str = "sio:";
const SESSION_CHANNEL_PREFIX: &str = "sid:";

/// Services named `constructor:<projectId>` share one inbox.
const CONSTRUCTOR_SERVICE: &str = "constructor";

// -----------------------------------------------------------------------------
// ----- Naming ----------------------------------------------------------------

pub fn self_channel(identity: &InstanceIdentity) -> String {
    format!(
        "{SELF_CHANNEL_PREFIX}{}:{}:{}",
        identity.host, identity.port, identity.instance_id
    )
}

pub fn session_channel(session_id: &str) -> String {
    format!("{SESSION_CHANNEL_PREFIX}{session_id}")
}

// -----------------------------------------------------------------------------
// ----- InboundChannel --------------------------------------------------------

/// What a channel we received a bus message on means to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundChannel<'a> {
    SelfInbox,
    Session(&'a str),
    Unknown,
}

impl<'a> InboundChannel<'a> {
    pub fn classify(channel: &'a str, self_channel: &str) -> Self {
        if channel == self_channel {
            return InboundChannel::SelfInbox;
        }

        match channel.strip_prefix(SESSION_CHANNEL_PREFIX) {
            Some(session_id) if !session_id.is_empty() => InboundChannel::Session(session_id),
            _ => InboundChannel::Unknown,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ServiceRoute ----------------------------------------------------------

/// Where a client message addressed to `service` gets published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceRoute<'a> {
    pub channel: &'a str,
    pub project_id: Option<&'a str>,
}

impl<'a> ServiceRoute<'a> {
    pub fn resolve(service: &'a str) -> Self {
        if service.starts_with(CONSTRUCTOR_SERVICE) {
            if let Some((channel, project_id)) = service.split_once(':') {
                return ServiceRoute {
                    channel,
                    project_id: Some(project_id),
                };
            }
        }

        ServiceRoute {
            channel: service,
            project_id: None,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
