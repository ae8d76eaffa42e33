//! The conversation store (spec §4.5).
//!
//! Grounded on the locking discipline used throughout
//! `examples/block-goose/crates/goose`'s shared-state types (e.g.
//! `conversation_fixer.rs`'s message-list handling), generalized to a
//! read/write-lock contract: reads return snapshot copies, writes are
//! serialized, and compaction is a compare-and-swap keyed on the current head
//! so a racing writer can't lose messages appended after the snapshot it
//! summarized.

use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::message::Message;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ModelTag {
    provider: String,
    model_family: String,
}

struct Inner {
    messages: Vec<Message>,
    current: Option<ModelTag>,
}

/// Ordered, insertion-only (during a live turn) message sequence, shared
/// between orchestration (the writer) and out-of-core observers such as
/// session persistence (spec §4.5, §5).
#[derive(Clone)]
pub struct ConversationStore {
    inner: Arc<RwLock<Inner>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                messages: Vec::new(),
                current: None,
            })),
        }
    }

    /// Appends a message, stamping `created` with now if it is unset (zero).
    pub fn append(&self, mut message: Message) {
        if message.created == 0 {
            message.created = Utc::now().timestamp();
        }
        self.inner.write().unwrap().messages.push(message);
    }

    /// A snapshot copy of the current messages — never an alias into the
    /// mutable store, so a caller holding this Vec cannot observe later
    /// appends (spec §5 "no aliasing of the mutable slice").
    pub fn snapshot(&self) -> Vec<Message> {
        self.inner.read().unwrap().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_user_messages(&self) -> usize {
        self.inner
            .read()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.role == crate::message::Role::User)
            .count()
    }

    /// Replaces the prefix `[0, expected_prefix_len)` with `summary`, but
    /// only if that prefix is still byte-for-byte identical to what the
    /// caller observed when it decided to compact (an atomic CAS guarding
    /// against a turn that appended new messages in the meantime).
    ///
    /// Returns `true` on success, `false` if the precondition no longer
    /// holds (the caller should re-snapshot and retry).
    pub fn compact_with_summary(&self, expected_prefix: &[Message], summary: Message) -> bool {
        let mut guard = self.inner.write().unwrap();
        if guard.messages.len() < expected_prefix.len() {
            return false;
        }
        if guard.messages[..expected_prefix.len()] != *expected_prefix {
            return false;
        }
        let rest = guard.messages.split_off(expected_prefix.len());
        guard.messages = vec![summary];
        guard.messages.extend(rest);
        true
    }

    pub fn set_current_model(&self, provider: impl Into<String>, model_family: impl Into<String>) {
        self.inner.write().unwrap().current = Some(ModelTag {
            provider: provider.into(),
            model_family: model_family.into(),
        });
    }

    pub fn current_model(&self) -> Option<(String, String)> {
        self.inner
            .read()
            .unwrap()
            .current
            .as_ref()
            .map(|tag| (tag.provider.clone(), tag.model_family.clone()))
    }

    /// True when the stored `(provider, model_family)` differs from the
    /// pair passed in (or nothing has been stored yet), signalling that
    /// native attachments from the previous turn need re-conversion before
    /// their next send (spec §4.5, §9).
    pub fn needs_conversion(&self, provider: &str, model_family: &str) -> bool {
        match &self.inner.read().unwrap().current {
            None => true,
            Some(tag) => tag.provider != provider || tag.model_family != model_family,
        }
    }

    pub fn clear(&self) {
        let mut guard = self.inner.write().unwrap();
        guard.messages.clear();
        guard.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn append_then_snapshot_preserves_order() {
        let store = ConversationStore::new();
        store.append(Message::user().with_text("one"));
        store.append(Message::assistant().with_text("two"));
        let snap = store.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].content, "one");
        assert_eq!(snap[1].content, "two");
    }

    #[test]
    fn snapshot_does_not_alias_future_appends() {
        let store = ConversationStore::new();
        store.append(Message::user().with_text("one"));
        let snap = store.snapshot();
        store.append(Message::user().with_text("two"));
        assert_eq!(snap.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn compact_with_summary_succeeds_when_prefix_matches() {
        let store = ConversationStore::new();
        store.append(Message::user().with_text("one"));
        store.append(Message::assistant().with_text("two"));
        let prefix = store.snapshot();
        store.append(Message::user().with_text("three"));

        let summary = Message::assistant().with_text("summary of one/two");
        assert!(store.compact_with_summary(&prefix, summary));

        let snap = store.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].content, "summary of one/two");
        assert_eq!(snap[1].content, "three");
    }

    #[test]
    fn compact_with_summary_fails_when_prefix_stale() {
        let store = ConversationStore::new();
        store.append(Message::user().with_text("one"));
        let prefix = store.snapshot();

        // Someone else mutated the head before we could compact.
        store.append(Message::assistant().with_text("interleaved"));
        let stale_prefix = vec![Message::user().with_text("different")];
        assert!(!store.compact_with_summary(&stale_prefix, Message::assistant().with_text("x")));
        let _ = prefix;
    }

    #[test]
    fn needs_conversion_true_until_model_is_set() {
        let store = ConversationStore::new();
        assert!(store.needs_conversion("anthropic", "claude-4"));
        store.set_current_model("anthropic", "claude-4");
        assert!(!store.needs_conversion("anthropic", "claude-4"));
        assert!(store.needs_conversion("openai", "gpt-4"));
    }
}
