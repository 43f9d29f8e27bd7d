use std::collections::HashMap;

use crate::shared_types::ConnectionId;

// -----------------------------------------------------------------------------
// ----- SessionEntry ----------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub connection_id: ConnectionId,
    pub service: String,
}

// -----------------------------------------------------------------------------
// ----- SessionTable ----------------------------------------------------------

/// Session id -> owning connection and service. At most one entry per
/// session id; a connection may own any number of sessions.
#[derive(Debug, Default)]
pub struct SessionTable {
    by_session: HashMap<String, SessionEntry>,
}

// -----------------------------------------------------------------------------
// ----- SessionTable: Public --------------------------------------------------

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry this one replaced, if any.
    pub fn insert(&mut self, session_id: &str, entry: SessionEntry) -> Option<SessionEntry> {
        self.by_session.insert(session_id.to_string(), entry)
    }

    pub fn get(&self, session_id: &str) -> Option<&SessionEntry> {
        self.by_session.get(session_id)
    }

    pub fn remove(&mut self, session_id: &str) -> Option<SessionEntry> {
        self.by_session.remove(session_id)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.by_session.contains_key(session_id)
    }

    /// Sessions owned by `connection_id`, sorted so callers act on them in a
    /// stable order.
    pub fn owned_by(&self, connection_id: &ConnectionId) -> Vec<String> {
        let mut owned: Vec<String> = self
            .by_session
            .iter()
            .filter(|(_, entry)| entry.connection_id == *connection_id)
            .map(|(session_id, _)| session_id.clone())
            .collect();

        owned.sort();
        owned
    }

    pub fn session_ids(&self) -> impl Iterator<Item = &str> {
        self.by_session.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_session.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_session.is_empty()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(cid: &str, service: &str) -> SessionEntry {
        SessionEntry {
            connection_id: ConnectionId::from(cid),
            service: service.to_string(),
        }
    }

    #[test]
    fn insert_get_remove() {
        let mut table = SessionTable::new();
        assert!(table.is_empty());

        assert_eq!(table.insert("s1", entry("c1", "click2call")), None);
        assert!(table.contains("s1"));
        assert_eq!(table.get("s1"), Some(&entry("c1", "click2call")));
        assert_eq!(table.len(), 1);

        assert_eq!(table.remove("s1"), Some(entry("c1", "click2call")));
        assert_eq!(table.remove("s1"), None);
        assert!(table.is_empty());
    }

    #[test]
    fn one_entry_per_session() {
        let mut table = SessionTable::new();
        table.insert("s1", entry("c1", "a"));

        let replaced = table.insert("s1", entry("c2", "b"));
        assert_eq!(replaced, Some(entry("c1", "a")));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("s1"), Some(&entry("c2", "b")));
    }

    #[test]
    fn owned_by_finds_every_session_of_a_connection() {
        let mut table = SessionTable::new();
        table.insert("s2", entry("c1", "a"));
        table.insert("s1", entry("c1", "b"));
        table.insert("s3", entry("c2", "a"));

        assert_eq!(table.owned_by(&ConnectionId::from("c1")), vec!["s1", "s2"]);
        assert_eq!(table.owned_by(&ConnectionId::from("c2")), vec!["s3"]);
        assert!(table.owned_by(&ConnectionId::from("c9")).is_empty());

        let mut ids: Vec<&str> = table.session_ids().collect();
        ids.sort();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
