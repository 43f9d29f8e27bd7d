//! Module: routing::message
//!
//! A `Message` is a JSON object with a string `type` discriminator. The
//! gateway interprets a handful of types and a handful of fields; every other
//! field rides along in an opaque bag and is written back out untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{error::Error as StdError, fmt};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const FIELD_TYPE: &str = "type";
pub const FIELD_SERVICE: &str = "service";
pub const FIELD_CLIENT_ID: &str = "clientId";
pub const FIELD_SENDER: &str = "sender";
pub const FIELD_SESSION_ID: &str = "sessionId";
pub const FIELD_PROJECT_ID: &str = "projectId";

// -----------------------------------------------------------------------------
// ----- MessageKind -----------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    StartSession,
    CloseSession,
    SessionStarted,
    SessionFailed,
    SessionClosed,

    /// Call, media and chat payloads. Relayed, never inspected.
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::StartSession => "START_SESSION",
            MessageKind::CloseSession => "CLOSE_SESSION",
            MessageKind::SessionStarted => "SESSION_STARTED",
            MessageKind::SessionFailed => "SESSION_FAILED",
            MessageKind::SessionClosed => "SESSION_CLOSED",
            MessageKind::Other(kind) => kind.as_str(),
        }
    }

    /// The only client-originated types the gateway stamps with routing
    /// metadata.
    pub fn is_session_request(&self) -> bool {
        matches!(self, MessageKind::StartSession | MessageKind::CloseSession)
    }
}

impl From<&str> for MessageKind {
    fn from(value: &str) -> Self {
        match value {
            "START_SESSION" => MessageKind::StartSession,
            "CLOSE_SESSION" => MessageKind::CloseSession,
            "SESSION_STARTED" => MessageKind::SessionStarted,
            "SESSION_FAILED" => MessageKind::SessionFailed,
            "SESSION_CLOSED" => MessageKind::SessionClosed,
            other => MessageKind::Other(other.to_string()),
        }
    }
}

impl From<String> for MessageKind {
    fn from(value: String) -> Self {
        match MessageKind::from(value.as_str()) {
            MessageKind::Other(_) => MessageKind::Other(value),
            known => known,
        }
    }
}

impl From<MessageKind> for String {
    fn from(value: MessageKind) -> Self {
        match value {
            MessageKind::Other(kind) => kind,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -----------------------------------------------------------------------------
// ----- Message ---------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    kind: MessageKind,

    #[serde(flatten)]
    fields: Map<String, Value>,
}

// -----------------------------------------------------------------------------
// ----- Message: Static -------------------------------------------------------

impl Message {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            fields: Map::new(),
        }
    }

    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let value = serde_json::from_str(text).map_err(MessageError::Json)?;
        Self::from_value(value)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, MessageError> {
        let value = serde_json::from_slice(bytes).map_err(MessageError::Json)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, MessageError> {
        let Value::Object(mut fields) = value else {
            return Err(MessageError::NotAnObject);
        };

        let kind = match fields.remove(FIELD_TYPE) {
            Some(Value::String(kind)) => MessageKind::from(kind),
            Some(_) => return Err(MessageError::InvalidType),
            None => return Err(MessageError::MissingType),
        };

        Ok(Self { kind, fields })
    }
}

// -----------------------------------------------------------------------------
// ----- Message: Public -------------------------------------------------------

impl Message {
    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// String field, `None` when absent or not a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.fields.insert(name.to_string(), value.into());
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Single-line rendering for logs.
    pub fn to_log_string(&self) -> String {
        match self.to_json() {
            Ok(json) => sanitize_for_log(&json),
            Err(_) => format!("<{} message>", self.kind),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Helpers ---------------------------------------------------------------

/// Strip line breaks so one message is one log line.
pub fn sanitize_for_log(text: &str) -> String {
    text.chars().filter(|c| !matches!(c, '\r' | '\n')).collect()
}

// -----------------------------------------------------------------------------
// ----- Error -----------------------------------------------------------------

#[derive(Debug)]
pub enum MessageError {
    Json(serde_json::Error),
    NotAnObject,
    MissingType,
    InvalidType,
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::Json(e) => write!(f, "invalid JSON: {e}"),
            MessageError::NotAnObject => write!(f, "message is not a JSON object"),
            MessageError::MissingType => write!(f, "type of message not specified"),
            MessageError::InvalidType => write!(f, "type of message is not a string"),
        }
    }
}

impl StdError for MessageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            MessageError::Json(e) => Some(e),
            _ => None,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
