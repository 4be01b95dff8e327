/// Send coordinator: optimistic insert, then reconcile or roll back
///
/// Per attempt: `Idle -> Optimistic -> Confirmed | RolledBack`. The message
/// cache and the latest-message projection are handed in at construction;
/// this is their only writer of optimistic state.
use crate::chat_types::{ClientEvent, LatestMessageEntry, Message, NewMessage};
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::gateway::ChatGateway;
use crate::ids;
use crate::message_cache::{MessageCache, OptimisticHandle};
use crate::projection::LatestMessageProjection;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Attempts at drawing a temporary id that is free in the conversation
const TEMP_ID_ATTEMPTS: usize = 3;

/// Lifecycle of one send attempt.
///
/// `Idle` is the state before `begin`; attempts are only handed out once
/// they are `Optimistic`, so callers never observe `Idle` on one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    Optimistic,
    Confirmed,
    RolledBack,
}

impl SendState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SendState::Confirmed | SendState::RolledBack)
    }
}

/// How a send attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Server accepted; the optimistic entry now carries `confirmed_id`
    Confirmed { temp_id: String, confirmed_id: String },
    /// Server accepted, but the optimistic entry was no longer there to rewrite
    Orphaned { temp_id: String, server_id: String },
    /// Server refused or was unreachable; the optimistic entry was removed
    RolledBack { temp_id: String, error: ChatError },
}

impl SendOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, SendOutcome::Confirmed { .. })
    }

    pub fn error(&self) -> Option<&ChatError> {
        match self {
            SendOutcome::RolledBack { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// One in-progress send, created by `SendCoordinator::begin`
#[derive(Debug)]
pub struct SendAttempt {
    handle: OptimisticHandle,
    message: Message,
    /// Projection entry before the optimistic write
    previous_latest: Option<LatestMessageEntry>,
    state: SendState,
}

impl SendAttempt {
    pub fn handle(&self) -> &OptimisticHandle {
        &self.handle
    }

    /// The optimistic message as inserted
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    fn advance(&mut self, next: SendState) {
        debug_assert!(
            self.state == SendState::Optimistic && next.is_terminal(),
            "illegal send transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }
}

/// A send running in the background
#[derive(Debug)]
pub struct SendTicket {
    handle: OptimisticHandle,
    task: JoinHandle<SendOutcome>,
}

impl SendTicket {
    pub fn handle(&self) -> &OptimisticHandle {
        &self.handle
    }

    /// Wait for the send to resolve
    pub async fn outcome(self) -> Result<SendOutcome> {
        self.task
            .await
            .map_err(|e| ChatError::Network(format!("send task failed: {}", e)))
    }
}

#[derive(Clone)]
pub struct SendCoordinator {
    cache: MessageCache,
    projection: LatestMessageProjection,
    gateway: Arc<dyn ChatGateway>,
    local_user_id: String,
    rollback_projection: bool,
    events: broadcast::Sender<ClientEvent>,
}

impl SendCoordinator {
    pub fn new(
        cache: MessageCache,
        projection: LatestMessageProjection,
        gateway: Arc<dyn ChatGateway>,
        config: &Config,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            cache,
            projection,
            gateway,
            local_user_id: config.local_user_id.clone(),
            rollback_projection: config.rollback_projection,
            events,
        }
    }

    /// `Idle -> Optimistic`: the message is visible in the cache and the
    /// projection when this returns, and no request has been issued yet.
    ///
    /// Blank text is dropped without touching any state (`Ok(None)`).
    pub async fn begin(&self, conversation_id: &str, text: &str) -> Result<Option<SendAttempt>> {
        let text = text.trim();
        if text.is_empty() {
            debug!("Ignoring blank send to {}", conversation_id);
            return Ok(None);
        }

        // A refresh landing now would race the insert below
        if self.cache.cancel_refresh(conversation_id).await {
            debug!("Cancelled in-flight refresh of {} before send", conversation_id);
        }

        let previous_latest = self.projection.get(conversation_id).await;
        let created_at = Utc::now();

        let mut last_err = None;
        for _ in 0..TEMP_ID_ATTEMPTS {
            let message = Message {
                id: ids::temporary_id(created_at),
                conversation_id: conversation_id.to_string(),
                sender_id: self.local_user_id.clone(),
                text: text.to_string(),
                created_at,
            };
            match self.cache.insert_optimistic(conversation_id, message.clone()).await {
                Ok(handle) => {
                    self.projection
                        .set(LatestMessageEntry::from_message(&message))
                        .await;
                    return Ok(Some(SendAttempt {
                        handle,
                        message,
                        previous_latest,
                        state: SendState::Optimistic,
                    }));
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            ChatError::Validation(format!("no free temporary id in {}", conversation_id))
        }))
    }

    /// `Optimistic -> Confirmed | RolledBack`: issue the request and settle
    pub async fn complete(&self, mut attempt: SendAttempt) -> SendOutcome {
        let request = NewMessage {
            conversation_id: attempt.message.conversation_id.clone(),
            text: attempt.message.text.clone(),
        };
        match self.gateway.send_message(request).await {
            Ok(sent) => self.confirm(&mut attempt, &sent.server_id).await,
            Err(e) => self.roll_back(&mut attempt, e).await,
        }
    }

    /// Optimistic insert now, network in the background
    pub async fn send(&self, conversation_id: &str, text: &str) -> Result<Option<SendTicket>> {
        let Some(attempt) = self.begin(conversation_id, text).await? else {
            return Ok(None);
        };
        let handle = attempt.handle.clone();
        let coordinator = self.clone();
        let task = tokio::spawn(async move { coordinator.complete(attempt).await });
        Ok(Some(SendTicket { handle, task }))
    }

    /// `begin` + `complete` in the caller's task
    pub async fn send_and_wait(&self, conversation_id: &str, text: &str) -> Result<Option<SendOutcome>> {
        match self.begin(conversation_id, text).await? {
            Some(attempt) => Ok(Some(self.complete(attempt).await)),
            None => Ok(None),
        }
    }

    async fn confirm(&self, attempt: &mut SendAttempt, server_id: &str) -> SendOutcome {
        let temp_id = attempt.handle.temp_id().to_string();
        let conversation_id = attempt.handle.conversation_id().to_string();
        attempt.advance(SendState::Confirmed);

        let Some(confirmed_id) = self.cache.reconcile(&attempt.handle, server_id).await else {
            warn!("Send {} confirmed as {} but its entry is gone", temp_id, server_id);
            return SendOutcome::Orphaned {
                temp_id,
                server_id: server_id.to_string(),
            };
        };

        // Same text and timestamp as the optimistic entry so the bubble keeps its place
        self.projection
            .set_unless_newer(LatestMessageEntry {
                conversation_id: conversation_id.clone(),
                message_id: confirmed_id.clone(),
                text: attempt.message.text.clone(),
                created_at: attempt.message.created_at,
            })
            .await;

        info!("Message {} in {} confirmed as {}", temp_id, conversation_id, confirmed_id);
        let _ = self.events.send(ClientEvent::MessageSent {
            conversation_id,
            temp_id: temp_id.clone(),
            confirmed_id: confirmed_id.clone(),
        });
        SendOutcome::Confirmed {
            temp_id,
            confirmed_id,
        }
    }

    async fn roll_back(&self, attempt: &mut SendAttempt, error: ChatError) -> SendOutcome {
        let temp_id = attempt.handle.temp_id().to_string();
        let conversation_id = attempt.handle.conversation_id().to_string();
        attempt.advance(SendState::RolledBack);

        warn!("Failed to send {} to {}: {}", temp_id, conversation_id, error);
        self.cache.rollback(&attempt.handle).await;
        if self.rollback_projection {
            self.projection
                .restore_if_current(&conversation_id, &temp_id, attempt.previous_latest.take())
                .await;
        }

        let _ = self.events.send(ClientEvent::SendFailed {
            conversation_id,
            temp_id: temp_id.clone(),
            error: error.to_string(),
        });
        SendOutcome::RolledBack { temp_id, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_gateway::FakeGateway;
    use std::time::Duration;

    fn setup(gateway: FakeGateway, config: Config) -> (SendCoordinator, MessageCache, LatestMessageProjection, Arc<FakeGateway>) {
        let gateway = Arc::new(gateway);
        let (tx, _) = broadcast::channel(64);
        let cache = MessageCache::new(gateway.clone(), Duration::from_secs(30), tx.clone());
        let projection = LatestMessageProjection::new();
        let coordinator =
            SendCoordinator::new(cache.clone(), projection.clone(), gateway.clone(), &config, tx);
        (coordinator, cache, projection, gateway)
    }

    #[tokio::test]
    async fn test_begin_trims_and_stamps_local_user() {
        let config = Config {
            local_user_id: "alice".into(),
            ..Default::default()
        };
        let (coordinator, cache, projection, gateway) = setup(FakeGateway::new(), config);

        let attempt = coordinator.begin("7", "  hi there  ").await.unwrap().unwrap();
        assert_eq!(attempt.state(), SendState::Optimistic);
        assert_eq!(attempt.message().text, "hi there");
        assert_eq!(attempt.message().sender_id, "alice");
        assert!(attempt.message().is_temporary());

        assert_eq!(cache.messages("7").await.len(), 1);
        assert_eq!(
            projection.get("7").await.unwrap().message_id,
            attempt.message().id
        );
        assert_eq!(gateway.send_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_complete_without_projection_rollback_keeps_stale_preview() {
        let config = Config {
            rollback_projection: false,
            ..Default::default()
        };
        let (coordinator, cache, projection, gateway) = setup(FakeGateway::new(), config);
        gateway
            .fail_next_sends(vec![ChatError::Network("offline".into())])
            .await;

        let outcome = coordinator.send_and_wait("7", "lost").await.unwrap().unwrap();
        assert!(matches!(outcome, SendOutcome::RolledBack { .. }));
        assert!(cache.messages("7").await.is_empty());
        assert_eq!(projection.get("7").await.unwrap().text, "lost");
    }

    #[tokio::test]
    async fn test_attempt_leaves_idle_and_settles_terminal() {
        assert!(!SendState::Idle.is_terminal());
        assert!(!SendState::Optimistic.is_terminal());
        assert!(SendState::Confirmed.is_terminal() && SendState::RolledBack.is_terminal());

        let (coordinator, _, _, _) = setup(FakeGateway::new(), Config::default());
        let attempt = coordinator.begin("7", "hi").await.unwrap().unwrap();
        assert_ne!(attempt.state(), SendState::Idle);
        assert!(coordinator.complete(attempt).await.is_confirmed());
    }

    #[tokio::test]
    async fn test_blank_send_is_silent() {
        let (coordinator, cache, projection, gateway) = setup(FakeGateway::new(), Config::default());
        assert!(coordinator.send("7", " \t\n ").await.unwrap().is_none());
        assert!(cache.messages("7").await.is_empty());
        assert!(projection.get("7").await.is_none());
        assert_eq!(gateway.send_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
