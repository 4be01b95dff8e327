/// Shared types for the chat engine
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One chat message. Two messages are the same entity iff their `id` matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque id, unique within the conversation (temporary until confirmed)
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Whether this entry is still waiting for server confirmation
    pub fn is_temporary(&self) -> bool {
        crate::ids::is_temporary(&self.id)
    }
}

/// A thread between the local user and one counterpart. Read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub phone: String,
    pub email: String,
}

/// Best known last message of a conversation (for the list view)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestMessageEntry {
    pub conversation_id: String,
    pub message_id: String,
    /// Preview text of the message
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl LatestMessageEntry {
    pub fn from_message(message: &Message) -> Self {
        Self {
            conversation_id: message.conversation_id.clone(),
            message_id: message.id.clone(),
            text: message.text.clone(),
            created_at: message.created_at,
        }
    }
}

/// Payload submitted to the gateway when sending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation_id: String,
    pub text: String,
}

/// What the gateway reports back for an accepted send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub server_id: String,
    /// Server-side timestamp, informational only
    pub created_at: Option<DateTime<Utc>>,
}

/// Fetch state of a cached query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum FetchStatus {
    /// Nothing requested yet
    Idle,
    /// A fetch is in flight
    Loading,
    /// Last fetch landed (or was superseded by a local write)
    Ready,
    /// Last fetch failed; cached data is still served
    Error(String),
}

impl FetchStatus {
    pub fn is_loading(&self) -> bool {
        matches!(self, FetchStatus::Loading)
    }
}

/// Snapshot handed to a conversation view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessagesView {
    /// Ascending by `created_at`
    pub messages: Vec<Message>,
    pub status: FetchStatus,
}

/// Snapshot handed to the conversation list view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationsView {
    pub conversations: Vec<Conversation>,
    pub status: FetchStatus,
}

/// One row of the conversation list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatListItem {
    pub conversation: Conversation,
    pub latest: Option<LatestMessageEntry>,
    pub blocked: bool,
}

/// Events broadcast to views (toasts, redraws)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The cached list of a conversation changed
    MessagesUpdated { conversation_id: String },
    /// A background refresh failed; cached data was kept
    RefreshFailed { conversation_id: String, error: String },
    /// An optimistic message was confirmed by the server
    MessageSent {
        conversation_id: String,
        temp_id: String,
        confirmed_id: String,
    },
    /// A send failed and its optimistic message was rolled back
    SendFailed {
        conversation_id: String,
        temp_id: String,
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = ClientEvent::SendFailed {
            conversation_id: "3".into(),
            temp_id: "temp-1-abc".into(),
            error: "Network error: reset".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "send_failed");
        assert_eq!(json["conversation_id"], "3");
    }

    #[test]
    fn test_latest_entry_mirrors_message() {
        let message = Message {
            id: "42".into(),
            conversation_id: "3".into(),
            sender_id: "3".into(),
            text: "hey".into(),
            created_at: Utc::now(),
        };
        let entry = LatestMessageEntry::from_message(&message);
        assert_eq!(entry.message_id, "42");
        assert_eq!(entry.created_at, message.created_at);
        assert!(!message.is_temporary());
    }
}
