//! Conversation store
//!
//! Holds the ordered message list and the typing flag. Every mutation is
//! applied synchronously, persisted (best-effort) and broadcast to
//! subscribers as a snapshot.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::{ChatMessage, MessageId, NewMessage};
use crate::storage::Storage;

/// Storage key the conversation record lives under.
pub const STORAGE_KEY: &str = "chat:conversation";

const RECORD_VERSION: u32 = 1;

/// Read-only view handed to subscribers after every mutation.
#[derive(Debug, Clone, Copy)]
pub struct ConversationSnapshot<'a> {
    pub messages: &'a [ChatMessage],
    pub is_typing: bool,
}

pub type SubscriptionId = u64;

type Subscriber = Box<dyn FnMut(&ConversationSnapshot<'_>) + Send>;

/// On-disk shape. Excludes the typing flag.
#[derive(Serialize, Deserialize)]
struct PersistedConversation {
    version: u32,
    state: PersistedState,
}

#[derive(Serialize, Deserialize)]
struct PersistedState {
    messages: Vec<ChatMessage>,
}

pub struct ConversationStore {
    messages: Vec<ChatMessage>,
    is_typing: bool,
    storage: Box<dyn Storage>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: SubscriptionId,
}

impl ConversationStore {
    /// Rehydrate from storage. Missing or unreadable records start empty.
    pub fn load(storage: Box<dyn Storage>) -> Self {
        let messages = match storage.load(STORAGE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<PersistedConversation>(&raw) {
                Ok(record) => record.state.messages,
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding unreadable conversation record");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load conversation");
                Vec::new()
            }
        };

        tracing::debug!(count = messages.len(), "Conversation loaded");

        Self {
            messages,
            is_typing: false,
            storage,
            subscribers: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn message(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn is_typing(&self) -> bool {
        self.is_typing
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn snapshot(&self) -> ConversationSnapshot<'_> {
        ConversationSnapshot {
            messages: &self.messages,
            is_typing: self.is_typing,
        }
    }

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&ConversationSnapshot<'_>) + Send + 'static,
    {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub_id, _)| *sub_id != id);
        self.subscribers.len() != before
    }

    /// Append a message, filling in `id` and `created_at` when absent.
    pub fn add_message(&mut self, new: NewMessage) -> ChatMessage {
        let id = match new.id {
            Some(id) if self.message(id).is_some() => {
                tracing::warn!(%id, "Message id already in use, assigning a fresh one");
                Uuid::new_v4()
            }
            Some(id) => id,
            None => Uuid::new_v4(),
        };

        let message = ChatMessage {
            id,
            role: new.role,
            content: new.content,
            created_at: new.created_at.unwrap_or_else(Utc::now),
            error: None,
        };

        self.messages.push(message.clone());
        self.persist();
        self.notify();
        message
    }

    /// Replace a message's content. Ignored for unknown ids and failed messages.
    pub fn update_message_content(&mut self, id: MessageId, content: &str) {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == id) else {
            return;
        };
        if message.has_error() {
            return;
        }
        message.content = content.to_string();
        self.persist();
        self.notify();
    }

    pub fn mark_message_error(&mut self, id: MessageId, error: &str) {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == id) else {
            return;
        };
        message.error = Some(error.to_string());
        self.persist();
        self.notify();
    }

    /// Not persisted.
    pub fn set_typing(&mut self, value: bool) {
        self.is_typing = value;
        self.notify();
    }

    pub fn clear_conversation(&mut self) {
        self.messages.clear();
        self.persist();
        self.notify();
    }

    fn persist(&self) {
        let record = PersistedConversation {
            version: RECORD_VERSION,
            state: PersistedState {
                messages: self.messages.clone(),
            },
        };

        let raw = match serde_json::to_string(&record) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize conversation");
                return;
            }
        };

        if let Err(e) = self.storage.save(STORAGE_KEY, &raw) {
            tracing::warn!(error = %e, "Failed to persist conversation");
        }
    }

    fn notify(&mut self) {
        let snapshot = ConversationSnapshot {
            messages: &self.messages,
            is_typing: self.is_typing,
        };
        for (_, callback) in self.subscribers.iter_mut() {
            callback(&snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ChatRole;
    use crate::storage::{FileStorage, MemoryStorage};
    use anyhow::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    struct FailingStorage;

    impl Storage for FailingStorage {
        fn load(&self, _key: &str) -> Result<Option<String>> {
            Err(anyhow::anyhow!("disk unavailable"))
        }

        fn save(&self, _key: &str, _value: &str) -> Result<()> {
            Err(anyhow::anyhow!("disk full"))
        }
    }

    fn memory_store() -> (ConversationStore, MemoryStorage) {
        let storage = MemoryStorage::new();
        (ConversationStore::load(Box::new(storage.clone())), storage)
    }

    #[test]
    fn test_add_message_assigns_id_and_timestamp() {
        let (mut store, _) = memory_store();
        let before = Utc::now();
        let msg = store.add_message(NewMessage::user("Hi"));

        assert_eq!(msg.role, ChatRole::User);
        assert_eq!(msg.content, "Hi");
        assert!(msg.created_at >= before);
        assert_eq!(store.messages(), &[msg]);
    }

    #[test]
    fn test_add_message_keeps_explicit_fields() {
        let (mut store, _) = memory_store();
        let id = Uuid::new_v4();
        let at = Utc::now() - chrono::Duration::hours(1);
        let msg = store.add_message(NewMessage::user("Hi").with_id(id).with_created_at(at));

        assert_eq!(msg.id, id);
        assert_eq!(msg.created_at, at);
    }

    #[test]
    fn test_duplicate_explicit_id_is_replaced() {
        let (mut store, _) = memory_store();
        let id = Uuid::new_v4();
        store.add_message(NewMessage::user("one").with_id(id));
        let second = store.add_message(NewMessage::user("two").with_id(id));

        assert_ne!(second.id, id);
        assert_eq!(store.messages().len(), 2);
    }

    #[test]
    fn test_messages_keep_insertion_order() {
        let (mut store, _) = memory_store();
        for i in 0..5 {
            store.add_message(NewMessage::user(format!("m{}", i)));
        }
        let contents: Vec<&str> = store.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        let (mut store, _) = memory_store();
        store.add_message(NewMessage::user("Hi"));
        store.update_message_content(Uuid::new_v4(), "changed");
        store.mark_message_error(Uuid::new_v4(), "boom");

        assert_eq!(store.messages()[0].content, "Hi");
        assert!(store.messages()[0].error.is_none());
    }

    #[test]
    fn test_content_frozen_after_error() {
        let (mut store, _) = memory_store();
        let msg = store.add_message(NewMessage::assistant_placeholder());
        store.mark_message_error(msg.id, "timeout");
        store.update_message_content(msg.id, "late text");

        let stored = store.message(msg.id).unwrap();
        assert_eq!(stored.content, "");
        assert_eq!(stored.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_typing_is_not_persisted() {
        let (mut store, storage) = memory_store();
        store.add_message(NewMessage::user("Hi"));
        store.set_typing(true);

        let raw = storage.load(STORAGE_KEY).unwrap().unwrap();
        assert!(!raw.contains("typing"));

        let reloaded = ConversationStore::load(Box::new(storage));
        assert!(!reloaded.is_typing());
        assert_eq!(reloaded.messages().len(), 1);
    }

    #[test]
    fn test_every_mutation_is_persisted() {
        let (mut store, storage) = memory_store();
        let msg = store.add_message(NewMessage::assistant_placeholder());
        store.update_message_content(msg.id, "partial");

        let reloaded = ConversationStore::load(Box::new(storage.clone()));
        assert_eq!(reloaded.messages()[0].content, "partial");

        store.mark_message_error(msg.id, "oops");
        let reloaded = ConversationStore::load(Box::new(storage));
        assert_eq!(reloaded.messages()[0].error.as_deref(), Some("oops"));
    }

    #[test]
    fn test_clear_persists_empty_state() {
        let dir = TempDir::new().unwrap();
        let mut store = ConversationStore::load(Box::new(FileStorage::new(dir.path())));
        store.add_message(NewMessage::user("Hi"));
        store.add_message(NewMessage::assistant_placeholder());
        store.clear_conversation();
        assert!(store.is_empty());

        let reloaded = ConversationStore::load(Box::new(FileStorage::new(dir.path())));
        assert!(reloaded.messages().is_empty());
    }

    #[test]
    fn test_corrupt_record_loads_empty() {
        let storage = MemoryStorage::new();
        storage.save(STORAGE_KEY, "{not json").unwrap();
        let store = ConversationStore::load(Box::new(storage));
        assert!(store.is_empty());
    }

    #[test]
    fn test_storage_failures_are_not_surfaced() {
        let mut store = ConversationStore::load(Box::new(FailingStorage));
        let msg = store.add_message(NewMessage::user("Hi"));
        store.update_message_content(msg.id, "Hello");
        store.clear_conversation();
        assert!(store.is_empty());
    }

    #[test]
    fn test_subscribers_see_every_mutation() {
        let (mut store, _) = memory_store();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let calls_clone = calls.clone();
        let seen_clone = seen.clone();
        store.subscribe(move |snapshot| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            seen_clone
                .lock()
                .unwrap()
                .push((snapshot.messages.len(), snapshot.is_typing));
        });

        let msg = store.add_message(NewMessage::assistant_placeholder());
        store.set_typing(true);
        store.update_message_content(msg.id, "x");
        store.mark_message_error(msg.id, "e");
        store.set_typing(false);
        store.clear_conversation();

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1, false), (1, true), (1, true), (1, true), (1, false), (0, false)]
        );
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let (mut store, _) = memory_store();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let id = store.subscribe(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        store.add_message(NewMessage::user("a"));
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.add_message(NewMessage::user("b"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
