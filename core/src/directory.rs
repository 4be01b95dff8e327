/// Conversation list: the conversations query plus per-row previews
use crate::blocklist::BlockList;
use crate::chat_types::{ChatListItem, Conversation, ConversationsView, FetchStatus, LatestMessageEntry};
use crate::error::{ChatError, Result};
use crate::gateway::ChatGateway;
use crate::message_cache::MessageCache;
use crate::projection::{latest_of, merge_latest, LatestMessageProjection};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use futures_util::stream::{self, StreamExt};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

type SharedList = Shared<BoxFuture<'static, Result<Vec<Conversation>>>>;

#[derive(Default)]
struct DirectoryState {
    conversations: Vec<Conversation>,
    status: Option<FetchStatus>,
    last_attempt: Option<Instant>,
    inflight: Option<SharedList>,
}

impl DirectoryState {
    fn status(&self) -> FetchStatus {
        if self.inflight.is_some() {
            FetchStatus::Loading
        } else {
            self.status.clone().unwrap_or(FetchStatus::Idle)
        }
    }
}

#[derive(Clone)]
pub struct ConversationDirectory {
    state: Arc<RwLock<DirectoryState>>,
    gateway: Arc<dyn ChatGateway>,
    cache: MessageCache,
    projection: LatestMessageProjection,
    blocklist: BlockList,
    stale_after: Duration,
    concurrency: usize,
}

impl ConversationDirectory {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        cache: MessageCache,
        projection: LatestMessageProjection,
        blocklist: BlockList,
        stale_after: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(DirectoryState::default())),
            gateway,
            cache,
            projection,
            blocklist,
            stale_after,
            concurrency: concurrency.max(1),
        }
    }

    /// Cached conversations; kicks off a background fetch when stale
    pub async fn conversations(&self) -> ConversationsView {
        let mut state = self.state.write().await;
        let stale = state
            .last_attempt
            .map(|at| at.elapsed() > self.stale_after)
            .unwrap_or(true);
        if state.inflight.is_none() && stale {
            let _ = self.spawn_fetch(&mut state);
        }
        ConversationsView {
            conversations: state.conversations.clone(),
            status: state.status(),
        }
    }

    /// Fetch the conversation list, sharing any request already in flight
    pub async fn refresh_conversations(&self) -> Result<Vec<Conversation>> {
        let outcome = {
            let mut state = self.state.write().await;
            self.spawn_fetch(&mut state)
        };
        outcome.await
    }

    /// Refresh the message cache of every conversation, at most
    /// `concurrency` requests at a time. Returns how many succeeded.
    pub async fn load_previews(&self, conversations: &[Conversation]) -> usize {
        let total = conversations.len();
        let ok = stream::iter(conversations.iter().map(|c| c.id.clone()))
            .map(|id| {
                let cache = self.cache.clone();
                async move {
                    match cache.refresh(&id).await {
                        Ok(_) => true,
                        Err(e) => {
                            debug!("Preview fetch for {} failed: {}", id, e);
                            false
                        }
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .filter(|ok| futures_util::future::ready(*ok))
            .count()
            .await;
        info!("Loaded previews: {}/{} conversations", ok, total);
        ok
    }

    /// Best known latest message: projection merged with the cached list
    pub async fn latest(&self, conversation_id: &str) -> Option<LatestMessageEntry> {
        let projected = self.projection.get(conversation_id).await;
        let fetched = latest_of(&self.cache.messages(conversation_id).await);
        merge_latest(projected.as_ref(), fetched.as_ref())
    }

    /// Rows for the list view, most recent activity first
    pub async fn chat_list(&self) -> Vec<ChatListItem> {
        let view = self.conversations().await;
        let mut items = Vec::with_capacity(view.conversations.len());
        for conversation in view.conversations {
            let latest = self.latest(&conversation.id).await;
            let blocked = self.blocklist.is_blocked(&conversation.id).await;
            items.push(ChatListItem {
                conversation,
                latest,
                blocked,
            });
        }
        items.sort_by(compare_rows);
        items
    }

    /// Profile of one user, `NotFound` when the backend does not know it
    pub async fn profile(&self, user_id: &str) -> Result<Conversation> {
        self.gateway.find_user(user_id).await
    }

    fn spawn_fetch(&self, state: &mut DirectoryState) -> SharedList {
        if let Some(inflight) = &state.inflight {
            return inflight.clone();
        }
        let directory = self.clone();
        let task = tokio::spawn(async move { directory.run_fetch().await });
        let outcome = async move {
            task.await
                .unwrap_or_else(|e| Err(ChatError::Network(format!("conversation fetch failed: {}", e))))
        }
        .boxed()
        .shared();
        state.inflight = Some(outcome.clone());
        outcome
    }

    async fn run_fetch(&self) -> Result<Vec<Conversation>> {
        debug!("Fetching conversations");
        let fetched = self.gateway.list_conversations().await;

        let mut state = self.state.write().await;
        state.inflight = None;
        state.last_attempt = Some(Instant::now());
        match fetched {
            Ok(conversations) => {
                debug!("Fetched {} conversations", conversations.len());
                state.conversations = conversations.clone();
                state.status = Some(FetchStatus::Ready);
                Ok(conversations)
            }
            Err(e) => {
                warn!("Conversation fetch failed: {}", e);
                state.status = Some(FetchStatus::Error(e.to_string()));
                Err(e)
            }
        }
    }
}

/// Newest preview first, rows without a preview last, then by name
fn compare_rows(a: &ChatListItem, b: &ChatListItem) -> Ordering {
    let a_at = a.latest.as_ref().map(|l| l.created_at);
    let b_at = b.latest.as_ref().map(|l| l.created_at);
    match (a_at, b_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.conversation.name.cmp(&b.conversation.name))
}
