//! Per-sender history store

use super::store::{ChatMessage, ConversationHistory};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type SharedHistory = Arc<Mutex<ConversationHistory>>;

/// Owns the bounded conversation history of every sender.
///
/// The sender table is guarded by a short-lived synchronous lock that is
/// never held across an `.await`. Each history sits behind its own async
/// mutex, so one sender can hold its exclusion across a slow completion
/// call while every other sender proceeds. Waiters on a sender's mutex are
/// served in FIFO order.
#[derive(Debug)]
pub struct HistoryStore {
    max_messages: usize,
    sessions: RwLock<HashMap<String, SharedHistory>>,
}

impl HistoryStore {
    /// Create an empty store whose histories hold at most `max_messages` entries
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Acquire exclusive access to a sender's history, creating it on first use
    pub async fn lock(&self, sender: &str) -> SessionGuard {
        let history = self.get_or_create(sender);
        SessionGuard {
            sender: sender.to_string(),
            history: history.lock_owned().await,
        }
    }

    /// Append a message to a sender's history
    pub async fn append(&self, sender: &str, message: ChatMessage) {
        self.lock(sender).await.append(message);
    }

    /// Copy of a sender's history; empty for senders never seen
    pub async fn snapshot(&self, sender: &str) -> Vec<ChatMessage> {
        match self.get(sender) {
            Some(history) => history.lock().await.snapshot(),
            None => Vec::new(),
        }
    }

    /// Empty a sender's history in place.
    ///
    /// Returns `true` if any messages were removed. Unknown senders are a
    /// no-op and do not get a table entry.
    pub async fn clear(&self, sender: &str) -> bool {
        match self.get(sender) {
            Some(history) => history.lock().await.clear() > 0,
            None => false,
        }
    }

    /// Number of senders with a table entry
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Known sender ids, sorted
    pub fn senders(&self) -> Vec<String> {
        let mut senders: Vec<String> = self.sessions.read().keys().cloned().collect();
        senders.sort();
        senders
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    fn get(&self, sender: &str) -> Option<SharedHistory> {
        self.sessions.read().get(sender).cloned()
    }

    fn get_or_create(&self, sender: &str) -> SharedHistory {
        if let Some(history) = self.get(sender) {
            return history;
        }

        let mut sessions = self.sessions.write();
        sessions
            .entry(sender.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationHistory::new(self.max_messages))))
            .clone()
    }
}

/// Exclusive handle on one sender's history
pub struct SessionGuard {
    sender: String,
    history: OwnedMutexGuard<ConversationHistory>,
}

impl SessionGuard {
    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.history.snapshot()
    }

    pub fn append(&mut self, message: ChatMessage) {
        self.history.push(message);
    }

    /// Returns `true` if any messages were removed
    pub fn clear(&mut self) -> bool {
        self.history.clear() > 0
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_snapshot_of_unseen_sender_is_empty() {
        let store = HistoryStore::new(10);
        assert!(store.snapshot("nobody").await.is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_append_and_snapshot() {
        let store = HistoryStore::new(10);
        store.append("A", ChatMessage::user("hello")).await;
        store.append("A", ChatMessage::assistant("hi there")).await;

        assert_eq!(
            store.snapshot("A").await,
            vec![ChatMessage::user("hello"), ChatMessage::assistant("hi there")]
        );
        assert_eq!(store.senders(), vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn test_bound_applies_per_sender() {
        let store = HistoryStore::new(3);
        for i in 0..5 {
            store.append("A", ChatMessage::user(format!("a{}", i))).await;
        }
        store.append("B", ChatMessage::user("b0")).await;

        assert_eq!(store.snapshot("A").await.len(), 3);
        assert_eq!(store.snapshot("A").await[0].content, "a2");
        assert_eq!(store.snapshot("B").await, vec![ChatMessage::user("b0")]);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent_and_keeps_entry() {
        let store = HistoryStore::new(10);
        store.append("A", ChatMessage::user("hello")).await;

        assert!(store.clear("A").await);
        assert!(store.snapshot("A").await.is_empty());
        assert!(!store.clear("A").await);
        assert_eq!(store.len(), 1);

        store.append("A", ChatMessage::user("again")).await;
        assert_eq!(store.snapshot("A").await.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_unseen_sender_creates_nothing() {
        let store = HistoryStore::new(10);
        assert!(!store.clear("ghost").await);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_lock_excludes_same_sender_only() {
        let store = Arc::new(HistoryStore::new(10));
        let guard = store.lock("A").await;

        // Another sender is not blocked
        tokio::time::timeout(Duration::from_millis(200), store.append("B", ChatMessage::user("b")))
            .await
            .expect("sender B must not wait on sender A");

        // The same sender is blocked until the guard drops
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            store.append("A", ChatMessage::user("a")),
        )
        .await;
        assert!(blocked.is_err());

        assert_eq!(guard.sender(), "A");
        drop(guard);
        store.append("A", ChatMessage::user("a")).await;
        assert_eq!(store.snapshot("A").await.len(), 1);
    }
}
