//! Session registry
//!
//! Maps each connected user to their one live connection. Owned and
//! mutated by the hub actor only.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::mailbox::Mailbox;
use crate::types::{ConnectionId, UserId};

/// A user's live connection
#[derive(Debug)]
pub struct Session {
    /// Identifies this particular connection of the user
    pub connection_id: ConnectionId,
    /// Hub → client queue
    pub mailbox: Mailbox,
    /// When the connection was registered
    pub connected_at: Instant,
}

impl Session {
    pub fn new(connection_id: ConnectionId, mailbox: Mailbox) -> Self {
        Self {
            connection_id,
            mailbox,
            connected_at: Instant::now(),
        }
    }

    /// How long this connection has been registered
    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// At most one session per user
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<UserId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` for `user_id`
    ///
    /// Returns the session it replaced, if the user was already connected.
    pub fn register(&mut self, user_id: UserId, session: Session) -> Option<Session> {
        self.sessions.insert(user_id, session)
    }

    /// Remove the user's session, but only if it is still `connection_id`
    ///
    /// A teardown from a connection that has since been replaced leaves the
    /// newer session alone and returns `None`.
    pub fn remove_if_current(
        &mut self,
        user_id: &UserId,
        connection_id: ConnectionId,
    ) -> Option<Session> {
        if !self.is_current(user_id, connection_id) {
            return None;
        }
        self.sessions.remove(user_id)
    }

    /// Check whether `connection_id` is the user's registered connection
    pub fn is_current(&self, user_id: &UserId, connection_id: ConnectionId) -> bool {
        self.sessions
            .get(user_id)
            .is_some_and(|s| s.connection_id == connection_id)
    }

    pub fn get(&self, user_id: &UserId) -> Option<&Session> {
        self.sessions.get(user_id)
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.sessions.contains_key(user_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UserId, &Session)> {
        self.sessions.iter()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        let (mailbox, _outbox) = Mailbox::channel(4);
        Session::new(ConnectionId::new(), mailbox)
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = SessionRegistry::new();
        let s = session();
        let conn = s.connection_id;

        assert!(registry.register("alice".into(), s).is_none());
        assert!(registry.contains(&"alice".into()));
        assert!(registry.is_current(&"alice".into(), conn));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_replaces_previous_connection() {
        let mut registry = SessionRegistry::new();
        let first = session();
        let first_conn = first.connection_id;
        let second = session();
        let second_conn = second.connection_id;

        registry.register("alice".into(), first);
        let replaced = registry.register("alice".into(), second).unwrap();

        assert_eq!(replaced.connection_id, first_conn);
        assert!(registry.is_current(&"alice".into(), second_conn));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stale_removal_keeps_newer_session() {
        let mut registry = SessionRegistry::new();
        let first = session();
        let first_conn = first.connection_id;
        let second = session();
        let second_conn = second.connection_id;

        registry.register("alice".into(), first);
        registry.register("alice".into(), second);

        assert!(registry.remove_if_current(&"alice".into(), first_conn).is_none());
        assert!(registry.contains(&"alice".into()));

        assert!(registry.remove_if_current(&"alice".into(), second_conn).is_some());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_uptime_counts_from_registration() {
        let s = session();
        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(s.uptime(), Duration::from_secs(90));
    }

    #[test]
    fn test_removal_is_idempotent() {
        let mut registry = SessionRegistry::new();
        let s = session();
        let conn = s.connection_id;
        registry.register("alice".into(), s);

        assert!(registry.remove_if_current(&"alice".into(), conn).is_some());
        assert!(registry.remove_if_current(&"alice".into(), conn).is_none());
    }
}
