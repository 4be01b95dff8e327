/// View-facing chat client
///
/// Wires one gateway into the message cache, the latest-message
/// projection, the send coordinator and the conversation directory, and
/// exposes the small surface screens need.
use crate::blocklist::BlockList;
use crate::chat_types::{
    ChatListItem, ClientEvent, Conversation, ConversationsView, LatestMessageEntry, Message,
    MessagesView,
};
use crate::config::Config;
use crate::coordinator::{SendCoordinator, SendOutcome, SendTicket};
use crate::directory::ConversationDirectory;
use crate::error::{ChatError, Result};
use crate::gateway::{ChatGateway, HttpGateway};
use crate::message_cache::MessageCache;
use crate::projection::LatestMessageProjection;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

#[derive(Clone)]
pub struct ChatClient {
    config: Config,
    cache: MessageCache,
    projection: LatestMessageProjection,
    coordinator: SendCoordinator,
    directory: ConversationDirectory,
    blocklist: BlockList,
    events: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    pub fn new(config: Config, gateway: Arc<dyn ChatGateway>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let cache = MessageCache::new(gateway.clone(), config.messages_stale_after, events.clone());
        let projection = LatestMessageProjection::new();
        let blocklist = BlockList::new();
        let coordinator = SendCoordinator::new(
            cache.clone(),
            projection.clone(),
            gateway.clone(),
            &config,
            events.clone(),
        );
        let directory = ConversationDirectory::new(
            gateway,
            cache.clone(),
            projection.clone(),
            blocklist.clone(),
            config.conversations_stale_after,
            config.preview_fetch_concurrency,
        );

        info!("Chat client ready for user {}", config.local_user_id);
        Self {
            config,
            cache,
            projection,
            coordinator,
            directory,
            blocklist,
            events,
        }
    }

    /// Client backed by the REST gateway at `config.base_url`
    pub fn with_http(config: Config) -> Result<Self> {
        config.validate()?;
        let gateway = HttpGateway::new(&config)?;
        Ok(Self::new(config, Arc::new(gateway)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Side channel for send failures, refresh errors and redraw hints
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Ordered messages and fetch status; refreshes stale data in the background
    pub async fn observe_messages(&self, conversation_id: &str) -> MessagesView {
        self.cache.get_messages(conversation_id).await
    }

    /// Preview for the list view, merged from the projection and the cache
    pub async fn observe_latest(&self, conversation_id: &str) -> Option<LatestMessageEntry> {
        self.directory.latest(conversation_id).await
    }

    /// Optimistic send. The message is in the cache when this returns; the
    /// result arrives later on the event channel (or via the ticket).
    pub async fn send(&self, conversation_id: &str, text: &str) -> Result<Option<SendTicket>> {
        self.ensure_not_blocked(conversation_id).await?;
        self.coordinator.send(conversation_id, text).await
    }

    /// Optimistic send that waits for the server
    pub async fn send_and_wait(&self, conversation_id: &str, text: &str) -> Result<Option<SendOutcome>> {
        self.ensure_not_blocked(conversation_id).await?;
        self.coordinator.send_and_wait(conversation_id, text).await
    }

    pub async fn refresh_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.cache.refresh(conversation_id).await
    }

    pub async fn conversations(&self) -> ConversationsView {
        self.directory.conversations().await
    }

    pub async fn refresh_conversations(&self) -> Result<Vec<Conversation>> {
        self.directory.refresh_conversations().await
    }

    /// Fetch the conversation list, then every conversation's messages
    /// through the bounded pool. Returns how many previews loaded.
    pub async fn load_chat_list(&self) -> Result<usize> {
        let conversations = self.directory.refresh_conversations().await?;
        Ok(self.directory.load_previews(&conversations).await)
    }

    /// Preview fetch for the conversations already known. Returns how many loaded.
    pub async fn load_previews(&self) -> usize {
        let view = self.directory.conversations().await;
        self.directory.load_previews(&view.conversations).await
    }

    pub async fn chat_list(&self) -> Vec<ChatListItem> {
        self.directory.chat_list().await
    }

    pub async fn profile(&self, user_id: &str) -> Result<Conversation> {
        self.directory.profile(user_id).await
    }

    pub fn blocklist(&self) -> &BlockList {
        &self.blocklist
    }

    pub fn projection(&self) -> &LatestMessageProjection {
        &self.projection
    }

    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }

    async fn ensure_not_blocked(&self, conversation_id: &str) -> Result<()> {
        if self.blocklist.is_blocked(conversation_id).await {
            return Err(ChatError::Validation(format!(
                "conversation {} is blocked",
                conversation_id
            )));
        }
        Ok(())
    }
}
