/// Per-conversation message cache with optimistic writes
///
/// Two writers share each conversation slot: background refreshes, which
/// replace the server-derived part of the list, and the send coordinator,
/// which inserts, reconciles and rolls back optimistic entries. A landing
/// refresh keeps every entry whose optimistic handle is still pending.
///
/// Ids are stamped with a per-slot write clock when first seen, so
/// reconcile can tell a server copy fetched after the optimistic insert
/// (the same message, already here) from an older entry that merely
/// shares the server id.
use crate::chat_types::{ClientEvent, FetchStatus, Message, MessagesView};
use crate::error::{ChatError, Result};
use crate::gateway::ChatGateway;
use crate::ids;
use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

type SharedRefresh = Shared<BoxFuture<'static, Result<Vec<Message>>>>;

/// Reference to one optimistic entry, used to reconcile or roll it back
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OptimisticHandle {
    conversation_id: String,
    temp_id: String,
}

impl OptimisticHandle {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn temp_id(&self) -> &str {
        &self.temp_id
    }
}

struct InflightRefresh {
    epoch: u64,
    abort: AbortHandle,
    outcome: SharedRefresh,
}

#[derive(Default)]
struct Slot {
    messages: Vec<Message>,
    /// Every id this conversation has ever held -> clock when first seen
    seen_ids: HashMap<String, u64>,
    /// Temp ids still waiting for reconcile/rollback -> clock at insert
    pending: HashMap<String, u64>,
    /// Bumped on every optimistic insert and landed refresh
    clock: u64,
    /// Confirmed id -> server id, until a refresh returns the server copy
    confirmed: HashMap<String, String>,
    /// Last settled status; `Loading` is derived from `inflight`
    status: Option<FetchStatus>,
    last_attempt: Option<Instant>,
    /// Bumped on cancellation so late refresh results are dropped
    epoch: u64,
    inflight: Option<InflightRefresh>,
}

impl Slot {
    fn status(&self) -> FetchStatus {
        if self.inflight.is_some() {
            FetchStatus::Loading
        } else {
            self.status.clone().unwrap_or(FetchStatus::Idle)
        }
    }

    fn is_stale(&self, stale_after: Duration) -> bool {
        match self.last_attempt {
            Some(at) => at.elapsed() > stale_after,
            None => true,
        }
    }

    fn sorted(&self) -> Vec<Message> {
        let mut out = self.messages.clone();
        // Stable: equal timestamps keep insertion order
        out.sort_by_key(|m| m.created_at);
        out
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }
}

/// Message cache shared between views, refreshes and the send coordinator
#[derive(Clone)]
pub struct MessageCache {
    slots: Arc<RwLock<HashMap<String, Slot>>>,
    gateway: Arc<dyn ChatGateway>,
    stale_after: Duration,
    events: broadcast::Sender<ClientEvent>,
}

impl MessageCache {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        stale_after: Duration,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            gateway,
            stale_after,
            events,
        }
    }

    /// Current messages, ascending by `created_at`, plus fetch status.
    ///
    /// Never waits on the network: a stale conversation gets a background
    /// refresh and the caller sees whatever is cached right now.
    pub async fn get_messages(&self, conversation_id: &str) -> MessagesView {
        let mut slots = self.slots.write().await;
        let slot = slots.entry(conversation_id.to_string()).or_default();
        if slot.inflight.is_none() && slot.is_stale(self.stale_after) {
            debug!("Messages for {} are stale, refreshing in background", conversation_id);
            let _ = self.spawn_refresh(slot, conversation_id);
        }
        MessagesView {
            messages: slot.sorted(),
            status: slot.status(),
        }
    }

    /// Cached messages without triggering a refresh
    pub async fn messages(&self, conversation_id: &str) -> Vec<Message> {
        let slots = self.slots.read().await;
        slots.get(conversation_id).map(Slot::sorted).unwrap_or_default()
    }

    pub async fn status(&self, conversation_id: &str) -> FetchStatus {
        let slots = self.slots.read().await;
        slots
            .get(conversation_id)
            .map(Slot::status)
            .unwrap_or(FetchStatus::Idle)
    }

    /// Replace the conversation's server-derived messages with a fresh fetch.
    ///
    /// Concurrent callers share one request. On failure the cached list is
    /// left untouched and the status flag records the error.
    pub async fn refresh(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let outcome = {
            let mut slots = self.slots.write().await;
            let slot = slots.entry(conversation_id.to_string()).or_default();
            self.spawn_refresh(slot, conversation_id)
        };
        outcome.await
    }

    /// Abort the in-flight refresh, if any. Its result will not be applied.
    pub async fn cancel_refresh(&self, conversation_id: &str) -> bool {
        let mut slots = self.slots.write().await;
        let Some(slot) = slots.get_mut(conversation_id) else {
            return false;
        };
        match slot.inflight.take() {
            Some(inflight) => {
                inflight.abort.abort();
                slot.epoch += 1;
                debug!("Cancelled refresh of {} (epoch {})", conversation_id, slot.epoch);
                true
            }
            None => false,
        }
    }

    /// Append a locally created message before the server has seen it
    pub async fn insert_optimistic(
        &self,
        conversation_id: &str,
        message: Message,
    ) -> Result<OptimisticHandle> {
        if message.conversation_id != conversation_id {
            return Err(ChatError::Validation(format!(
                "message belongs to {}, not {}",
                message.conversation_id, conversation_id
            )));
        }
        if !ids::is_temporary(&message.id) {
            return Err(ChatError::Validation(format!(
                "optimistic message needs a temporary id, got {}",
                message.id
            )));
        }

        let mut slots = self.slots.write().await;
        let slot = slots.entry(conversation_id.to_string()).or_default();
        if slot.seen_ids.contains_key(&message.id) {
            return Err(ChatError::Validation(format!(
                "id {} already used in {}",
                message.id, conversation_id
            )));
        }

        let handle = OptimisticHandle {
            conversation_id: conversation_id.to_string(),
            temp_id: message.id.clone(),
        };
        slot.clock += 1;
        slot.seen_ids.insert(message.id.clone(), slot.clock);
        slot.pending.insert(message.id.clone(), slot.clock);
        slot.messages.push(message);
        drop(slots);

        debug!("Optimistic insert {} into {}", handle.temp_id, conversation_id);
        self.notify_updated(conversation_id);
        Ok(handle)
    }

    /// Swap the temporary id for a fresh confirmed one.
    ///
    /// Returns the id the message now carries, or `None` if the handle was
    /// already reconciled or its entry is gone. When a refresh already
    /// brought the server copy in, the temporary entry is dropped and the
    /// server id is returned.
    pub async fn reconcile(&self, handle: &OptimisticHandle, server_id: &str) -> Option<String> {
        let mut slots = self.slots.write().await;
        let slot = slots.get_mut(&handle.conversation_id)?;
        let Some(inserted_at) = slot.pending.remove(&handle.temp_id) else {
            debug!("Reconcile of {} is a no-op", handle.temp_id);
            return None;
        };
        let Some(pos) = slot.position(&handle.temp_id) else {
            debug!("Optimistic entry {} vanished before reconcile", handle.temp_id);
            return None;
        };

        let server_copy_landed = slot
            .seen_ids
            .get(server_id)
            .is_some_and(|&seen_at| seen_at > inserted_at)
            && slot.position(server_id).is_some();
        if server_copy_landed {
            slot.messages.remove(pos);
            drop(slots);

            info!(
                "Dropped {} in {}, server copy {} already present",
                handle.temp_id, handle.conversation_id, server_id
            );
            self.notify_updated(&handle.conversation_id);
            return Some(server_id.to_string());
        }

        let confirmed =
            ids::unique_confirmed_id(server_id, Utc::now(), |c| slot.seen_ids.contains_key(c));
        slot.seen_ids.insert(confirmed.clone(), slot.clock);
        slot.confirmed.insert(confirmed.clone(), server_id.to_string());
        slot.messages[pos].id = confirmed.clone();
        drop(slots);

        info!("Reconciled {} -> {} in {}", handle.temp_id, confirmed, handle.conversation_id);
        self.notify_updated(&handle.conversation_id);
        Some(confirmed)
    }

    /// Remove the optimistic entry if it is still there
    pub async fn rollback(&self, handle: &OptimisticHandle) -> bool {
        let mut slots = self.slots.write().await;
        let Some(slot) = slots.get_mut(&handle.conversation_id) else {
            return false;
        };
        slot.pending.remove(&handle.temp_id);
        let Some(pos) = slot.position(&handle.temp_id) else {
            return false;
        };
        slot.messages.remove(pos);
        drop(slots);

        info!("Rolled back {} in {}", handle.temp_id, handle.conversation_id);
        self.notify_updated(&handle.conversation_id);
        true
    }

    /// Start a refresh for a locked slot, or join the one already running
    fn spawn_refresh(&self, slot: &mut Slot, conversation_id: &str) -> SharedRefresh {
        if let Some(inflight) = &slot.inflight {
            debug!("Joining in-flight refresh of {}", conversation_id);
            return inflight.outcome.clone();
        }

        let epoch = slot.epoch;
        let cache = self.clone();
        let id = conversation_id.to_string();
        let task = tokio::spawn(async move { cache.run_refresh(id, epoch).await });
        let abort = task.abort_handle();

        let id = conversation_id.to_string();
        let outcome = async move {
            match task.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => {
                    Err(ChatError::Cancelled(format!("refresh of {}", id)))
                }
                Err(e) => Err(ChatError::Network(format!("refresh of {} failed: {}", id, e))),
            }
        }
        .boxed()
        .shared();

        slot.inflight = Some(InflightRefresh {
            epoch,
            abort,
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn run_refresh(&self, conversation_id: String, epoch: u64) -> Result<Vec<Message>> {
        debug!("Fetching messages for {}", conversation_id);
        let fetched = self.gateway.list_messages(&conversation_id).await;

        let mut slots = self.slots.write().await;
        let slot = slots.entry(conversation_id.clone()).or_default();
        if slot.inflight.as_ref().map(|f| f.epoch) == Some(epoch) {
            slot.inflight = None;
        }
        if slot.epoch != epoch {
            debug!("Dropping stale refresh of {} (epoch {} < {})", conversation_id, epoch, slot.epoch);
            return Err(ChatError::Cancelled(format!("refresh of {}", conversation_id)));
        }
        slot.last_attempt = Some(Instant::now());

        match fetched {
            Ok(server) => {
                let mut server_ids: HashSet<String> = HashSet::new();
                let mut next: Vec<Message> = server
                    .into_iter()
                    .filter(|m| m.conversation_id == conversation_id)
                    .filter(|m| server_ids.insert(m.id.clone()))
                    .collect();
                // Server copies of locally confirmed sends replace them
                slot.confirmed.retain(|_, server_id| !server_ids.contains(server_id));
                let kept = slot
                    .messages
                    .iter()
                    .filter(|m| !server_ids.contains(&m.id))
                    .filter(|m| slot.pending.contains_key(&m.id) || slot.confirmed.contains_key(&m.id))
                    .cloned()
                    .collect::<Vec<_>>();
                if !kept.is_empty() {
                    debug!("Keeping {} unsynced local entries in {}", kept.len(), conversation_id);
                }
                next.extend(kept);

                slot.clock += 1;
                let clock = slot.clock;
                for m in &next {
                    slot.seen_ids.entry(m.id.clone()).or_insert(clock);
                }
                slot.messages = next;
                slot.status = Some(FetchStatus::Ready);
                let out = slot.sorted();
                drop(slots);

                debug!("Refresh of {} landed with {} messages", conversation_id, out.len());
                self.notify_updated(&conversation_id);
                Ok(out)
            }
            Err(e) => {
                slot.status = Some(FetchStatus::Error(e.to_string()));
                drop(slots);

                warn!("Refresh of {} failed: {}", conversation_id, e);
                let _ = self.events.send(ClientEvent::RefreshFailed {
                    conversation_id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn notify_updated(&self, conversation_id: &str) {
        let _ = self.events.send(ClientEvent::MessagesUpdated {
            conversation_id: conversation_id.to_string(),
        });
    }
}
