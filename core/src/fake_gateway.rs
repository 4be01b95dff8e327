/// In-memory gateway for tests and the offline demo
use crate::chat_types::{Conversation, Message, NewMessage, SentMessage};
use crate::error::{ChatError, Result};
use crate::gateway::ChatGateway;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};

pub struct FakeGateway {
    pub conversations: Mutex<Vec<Conversation>>,
    /// Every post on the "server", unfiltered
    pub messages: Mutex<Vec<Message>>,
    pub sent: Mutex<Vec<NewMessage>>,
    pub conversation_calls: AtomicU64,
    pub message_calls: Mutex<HashMap<String, u64>>,
    pub send_calls: AtomicU64,
    fail_fetches: Mutex<Option<ChatError>>,
    fail_sends: Mutex<Vec<ChatError>>,
    next_server_id: AtomicU64,
    fixed_server_id: Option<String>,
    fetch_delay: Duration,
    send_gate: Option<Semaphore>,
    store_before_ack: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self {
            conversations: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            conversation_calls: AtomicU64::new(0),
            message_calls: Mutex::new(HashMap::new()),
            send_calls: AtomicU64::new(0),
            fail_fetches: Mutex::new(None),
            fail_sends: Mutex::new(Vec::new()),
            next_server_id: AtomicU64::new(101),
            fixed_server_id: None,
            fetch_delay: Duration::from_millis(0),
            send_gate: None,
            store_before_ack: false,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeded with conversations and posts
    pub fn with_data(conversations: Vec<Conversation>, messages: Vec<Message>) -> Self {
        Self {
            conversations: Mutex::new(conversations),
            messages: Mutex::new(messages),
            ..Self::default()
        }
    }

    /// Every fetch sleeps this long before answering
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    /// Sends park until `release_sends` hands out permits
    pub fn with_held_sends(mut self) -> Self {
        self.send_gate = Some(Semaphore::new(0));
        self
    }

    /// Held sends are stored on the server first and only the answer waits
    /// for `release_sends`, so a refresh can see the post before its sender does
    pub fn with_late_acks(mut self) -> Self {
        self.send_gate = Some(Semaphore::new(0));
        self.store_before_ack = true;
        self
    }

    /// The server answers every send with the same id, like the demo backend
    pub fn with_fixed_server_id(mut self, id: &str) -> Self {
        self.fixed_server_id = Some(id.to_string());
        self
    }

    pub fn release_sends(&self, n: usize) {
        if let Some(gate) = &self.send_gate {
            gate.add_permits(n);
        }
    }

    /// Queue failures for the next sends, consumed in order
    pub async fn fail_next_sends(&self, errors: Vec<ChatError>) {
        self.fail_sends.lock().await.extend(errors);
    }

    /// Fail every fetch until cleared with `None`
    pub async fn set_fetch_failure(&self, error: Option<ChatError>) {
        *self.fail_fetches.lock().await = error;
    }

    pub async fn push_message(&self, message: Message) {
        self.messages.lock().await.push(message);
    }

    pub async fn message_calls_for(&self, conversation_id: &str) -> u64 {
        self.message_calls
            .lock()
            .await
            .get(conversation_id)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of fetches observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn wait_for_release(&self) -> Result<()> {
        if let Some(gate) = &self.send_gate {
            gate.acquire()
                .await
                .map_err(|_| ChatError::Network("send gate closed".to_string()))?
                .forget();
        }
        Ok(())
    }

    async fn fetch_pause(&self) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match self.fail_fetches.lock().await.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChatGateway for FakeGateway {
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.conversation_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_pause().await?;
        Ok(self.conversations.lock().await.clone())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        *self
            .message_calls
            .lock()
            .await
            .entry(conversation_id.to_string())
            .or_insert(0) += 1;
        self.fetch_pause().await?;
        Ok(self
            .messages
            .lock()
            .await
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn send_message(&self, message: NewMessage) -> Result<SentMessage> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if !self.store_before_ack {
            self.wait_for_release().await?;
        }
        {
            let mut failures = self.fail_sends.lock().await;
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
        }
        if message.conversation_id.is_empty() {
            return Err(ChatError::Validation("Missing field: userId".to_string()));
        }

        let server_id = match &self.fixed_server_id {
            Some(id) => id.clone(),
            None => self.next_server_id.fetch_add(1, Ordering::SeqCst).to_string(),
        };
        let created_at = Utc::now();
        self.messages.lock().await.push(Message {
            id: server_id.clone(),
            conversation_id: message.conversation_id.clone(),
            sender_id: message.conversation_id.clone(),
            text: message.text.clone(),
            created_at,
        });
        self.sent.lock().await.push(message);
        if self.store_before_ack {
            self.wait_for_release().await?;
        }
        Ok(SentMessage {
            server_id,
            created_at: Some(created_at),
        })
    }
}
