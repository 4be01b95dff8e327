/// Latest-message projection for the conversation list
///
/// Kept apart from the message cache so the list can render previews
/// without a full fetch per conversation. Nothing derives it from the cache;
/// the send coordinator writes it next to every optimistic change.
use crate::chat_types::{LatestMessageEntry, Message};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Clone, Default)]
pub struct LatestMessageProjection {
    entries: Arc<RwLock<HashMap<String, LatestMessageEntry>>>,
}

impl LatestMessageProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot of `entry.conversation_id`
    pub async fn set(&self, entry: LatestMessageEntry) {
        debug!(
            "Latest for {} -> {} @ {}",
            entry.conversation_id, entry.message_id, entry.created_at
        );
        let mut entries = self.entries.write().await;
        entries.insert(entry.conversation_id.clone(), entry);
    }

    /// Overwrite unless the slot already holds a strictly newer message
    pub async fn set_unless_newer(&self, entry: LatestMessageEntry) -> bool {
        let mut entries = self.entries.write().await;
        if let Some(current) = entries.get(&entry.conversation_id) {
            if current.created_at > entry.created_at {
                debug!(
                    "Latest for {} kept at {}, newer than {}",
                    entry.conversation_id, current.message_id, entry.message_id
                );
                return false;
            }
        }
        entries.insert(entry.conversation_id.clone(), entry);
        true
    }

    pub async fn get(&self, conversation_id: &str) -> Option<LatestMessageEntry> {
        let entries = self.entries.read().await;
        entries.get(conversation_id).cloned()
    }

    pub async fn clear(&self, conversation_id: &str) -> Option<LatestMessageEntry> {
        let mut entries = self.entries.write().await;
        entries.remove(conversation_id)
    }

    /// Put `previous` back (or clear the slot) only while the slot still
    /// names `message_id`; a newer write is left alone.
    pub async fn restore_if_current(
        &self,
        conversation_id: &str,
        message_id: &str,
        previous: Option<LatestMessageEntry>,
    ) -> bool {
        let mut entries = self.entries.write().await;
        let current = entries.get(conversation_id).map(|e| e.message_id.as_str());
        if current != Some(message_id) {
            return false;
        }
        match previous {
            Some(entry) => {
                entries.insert(conversation_id.to_string(), entry);
            }
            None => {
                entries.remove(conversation_id);
            }
        }
        debug!("Restored latest for {} after rollback of {}", conversation_id, message_id);
        true
    }

    pub async fn reset(&self) {
        self.entries.write().await.clear();
    }
}

/// Latest message of an already fetched list (max `created_at`, last wins on ties)
pub fn latest_of(messages: &[Message]) -> Option<LatestMessageEntry> {
    messages
        .iter()
        .max_by_key(|m| m.created_at)
        .map(LatestMessageEntry::from_message)
}

/// Read-side merge of the projection with a fetched candidate.
///
/// The projected entry wins only with a strictly newer `created_at`; on a
/// tie the fetched one is returned.
pub fn merge_latest(
    projected: Option<&LatestMessageEntry>,
    fetched: Option<&LatestMessageEntry>,
) -> Option<LatestMessageEntry> {
    match (projected, fetched) {
        (Some(p), Some(f)) => {
            if p.created_at > f.created_at {
                Some(p.clone())
            } else {
                Some(f.clone())
            }
        }
        (Some(p), None) => Some(p.clone()),
        (None, Some(f)) => Some(f.clone()),
        (None, None) => None,
    }
}
