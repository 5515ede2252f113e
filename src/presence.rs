//! Presence records and snapshots
//!
//! Tracks every user the hub has seen, whether they are online, and a
//! preview of the last message addressed to them. Users are flipped
//! offline on disconnect but never forgotten, so the roster keeps showing
//! recently-online users.

use std::collections::BTreeMap;

use crate::message::PresenceEntry;
use crate::types::UserId;

/// Longest preview kept, in characters
pub const PREVIEW_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceRecord {
    pub online: bool,
    pub last_message: String,
}

/// All presence records, ordered by user id
#[derive(Debug, Default)]
pub struct PresenceBook {
    records: BTreeMap<UserId, PresenceRecord>,
}

impl PresenceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a user online, creating their record on first connect
    pub fn mark_online(&mut self, user_id: &UserId) {
        self.records.entry(user_id.clone()).or_default().online = true;
    }

    /// Mark a user offline
    ///
    /// Returns whether the flag actually changed.
    pub fn mark_offline(&mut self, user_id: &UserId) -> bool {
        match self.records.get_mut(user_id) {
            Some(record) if record.online => {
                record.online = false;
                true
            }
            _ => false,
        }
    }

    /// Record the last message addressed to `user_id`
    ///
    /// Only users that have connected at least once have a record; returns
    /// false for anyone else.
    pub fn set_preview(&mut self, user_id: &UserId, content: &str) -> bool {
        let Some(record) = self.records.get_mut(user_id) else {
            return false;
        };
        record.last_message = preview(content);
        true
    }

    pub fn get(&self, user_id: &UserId) -> Option<&PresenceRecord> {
        self.records.get(user_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Full roster, ordered by user id
    pub fn snapshot(&self) -> Vec<PresenceEntry> {
        self.records
            .iter()
            .map(|(user_id, record)| PresenceEntry {
                user_id: user_id.clone(),
                online: record.online,
                last_message: record.last_message.clone(),
            })
            .collect()
    }
}

/// Truncate message content to a preview
fn preview(content: &str) -> String {
    content.chars().take(PREVIEW_MAX_CHARS).collect()
}
