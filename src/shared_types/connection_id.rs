use std::fmt;

use uuid::Uuid;

// -----------------------------------------------------------------------------
// ----- ConnectionId ----------------------------------------------------------

/// Identifies one live client connection. Backends echo it back to us as the
/// `clientId` field, so it travels as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

// -----------------------------------------------------------------------------
// ----- ConnectionId: Static --------------------------------------------------

impl ConnectionId {
    pub fn random() -> Self {
        ConnectionId(Uuid::new_v4().simple().to_string())
    }
}

// -----------------------------------------------------------------------------
// ----- ConnectionId: Public --------------------------------------------------

impl ConnectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        ConnectionId(value.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        ConnectionId(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
