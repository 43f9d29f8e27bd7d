use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc;

use crate::routing::{ConnectionRegistry, Message};
use crate::shared_types::ConnectionId;

// -----------------------------------------------------------------------------
// ----- ClientRegistry --------------------------------------------------------

/// Live client connections, keyed by id. Each entry is the outbound queue the
/// connection's writer task drains.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    inner: Arc<RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>>,
}

// -----------------------------------------------------------------------------
// ----- ClientRegistry: Public ------------------------------------------------

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection_id: ConnectionId, outbound: mpsc::UnboundedSender<Message>) {
        self.inner.write().insert(connection_id, outbound);
    }

    pub fn unregister(&self, connection_id: &ConnectionId) -> bool {
        self.inner.write().remove(connection_id).is_some()
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.inner.read().contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl ConnectionRegistry for ClientRegistry {
    fn deliver(&self, connection_id: &ConnectionId, message: &Message) -> bool {
        let guard = self.inner.read();
        match guard.get(connection_id) {
            Some(outbound) => outbound.send(message.clone()).is_ok(),
            None => false,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
