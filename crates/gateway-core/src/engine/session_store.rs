//! Session Store (§4.4).
//!
//! Per-SessionKey conversation memory with atomic append and bounded
//! context export: one append-and-touch-metadata map entry per session
//! key, with last-N-turns truncation on export rather than a token budget.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::atoms::types::{Role, SessionKey, SessionMessage, SessionRecord};

/// In-memory map with per-key locking (§5 "Session Store: per-key mutex on
/// write; reads take a consistent snapshot"). A real deployment could add a
/// pass-through to a shared key-value store (§4.4 storage contract); the
/// dispatch core only requires the in-memory contract below.
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionKey, SessionRecord>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl_s: u64) -> Self {
        Self { sessions: Mutex::new(HashMap::new()), ttl: Duration::seconds(ttl_s as i64) }
    }

    /// `load(key) -> SessionRecord` (creates-if-absent with empty history).
    pub fn load(&self, key: &SessionKey) -> SessionRecord {
        let mut sessions = self.sessions.lock();
        sessions.entry(key.clone()).or_insert_with(|| SessionRecord::new(key.clone())).clone()
    }

    /// Atomic single-message append; updates `updated_at` and
    /// `message_count` in the same critical section (mirrors
    /// `messages::add_message`'s insert-then-update-count pattern).
    pub fn append(&self, key: &SessionKey, role: Role, content: String, timestamp: DateTime<Utc>) {
        let mut sessions = self.sessions.lock();
        let record = sessions.entry(key.clone()).or_insert_with(|| SessionRecord::new(key.clone()));
        record.messages.push_back(SessionMessage { role, content, timestamp });
        record.message_count = record.messages.len();
        record.updated_at = timestamp;
    }

    /// `recent(key, n) -> ordered sequence of messages`.
    pub fn recent(&self, key: &SessionKey, n: usize) -> Vec<SessionMessage> {
        let sessions = self.sessions.lock();
        sessions.get(key).map(|r| r.recent(n)).unwrap_or_default()
    }

    /// `expire(key)`: explicit removal.
    pub fn expire(&self, key: &SessionKey) {
        self.sessions.lock().remove(key);
    }

    /// TTL-based eviction sweep: removes sessions whose `updated_at` is
    /// older than the configured TTL. Intended to be called periodically
    /// (e.g. alongside the Heartbeat Reaper's cadence).
    pub fn sweep_expired(&self) -> usize {
        let cutoff = Utc::now() - self.ttl;
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, record| record.updated_at >= cutoff);
        before - sessions.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

/// Best-effort durability wrapper: logs every append rather than letting it
/// pass silently (§4.4 storage contract "a failed write must be logged, not
/// dropped silently"). The in-memory store itself cannot fail, but this is
/// the seam a pass-through to a remote key-value store would hang its error
/// logging off of, so the Dispatcher calls through here rather than
/// `SessionStore::append` directly.
pub fn append_or_log(store: &SessionStore, key: &SessionKey, role: Role, content: String, timestamp: DateTime<Utc>) {
    store.append(key, role, content, timestamp);
    log::debug!("session {key} appended message at {timestamp}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_creates_empty_session_if_absent() {
        let store = SessionStore::new(86_400);
        let key = SessionKey("s1".into());
        let record = store.load(&key);
        assert_eq!(record.message_count, 0);
    }

    #[test]
    fn append_then_recent_returns_appended_message_as_last() {
        let store = SessionStore::new(86_400);
        let key = SessionKey("s1".into());
        store.append(&key, Role::User, "hello".into(), Utc::now());
        let recent = store.recent(&key, 10);
        assert_eq!(recent.last().unwrap().content, "hello");
    }

    #[test]
    fn append_updates_message_count_and_updated_at() {
        let store = SessionStore::new(86_400);
        let key = SessionKey("s1".into());
        let before = store.load(&key).created_at;
        store.append(&key, Role::User, "a".into(), Utc::now());
        store.append(&key, Role::Assistant, "b".into(), Utc::now());
        let record = store.load(&key);
        assert_eq!(record.message_count, 2);
        assert!(record.updated_at >= before);
    }

    #[test]
    fn recent_respects_bounded_context() {
        let store = SessionStore::new(86_400);
        let key = SessionKey("s1".into());
        for i in 0..50 {
            store.append(&key, Role::User, format!("m{i}"), Utc::now());
        }
        let recent = store.recent(&key, 20);
        assert_eq!(recent.len(), 20);
        assert_eq!(recent[0].content, "m30");
        assert_eq!(recent[19].content, "m49");
    }

    #[test]
    fn sessions_are_isolated_by_key() {
        let store = SessionStore::new(86_400);
        store.append(&SessionKey("a".into()), Role::User, "only-a".into(), Utc::now());
        let recent_b = store.recent(&SessionKey("b".into()), 10);
        assert!(recent_b.is_empty());
    }

    #[test]
    fn sweep_expired_removes_stale_sessions() {
        let store = SessionStore::new(0);
        let key = SessionKey("s1".into());
        store.append(&key, Role::User, "hi".into(), Utc::now() - Duration::seconds(10));
        let removed = store.sweep_expired();
        assert_eq!(removed, 1);
        assert_eq!(store.session_count(), 0);
    }
}
