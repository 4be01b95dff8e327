/// Locally blocked users (in memory, per session)
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Clone, Default)]
pub struct BlockList {
    ids: Arc<RwLock<HashSet<String>>>,
}

impl BlockList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the user was already blocked
    pub async fn block(&self, user_id: &str) -> bool {
        let added = self.ids.write().await.insert(user_id.to_string());
        if added {
            info!("Blocked {}", user_id);
        }
        added
    }

    pub async fn unblock(&self, user_id: &str) -> bool {
        let removed = self.ids.write().await.remove(user_id);
        if removed {
            info!("Unblocked {}", user_id);
        }
        removed
    }

    /// Flip the state and return the new one
    pub async fn toggle(&self, user_id: &str) -> bool {
        let mut ids = self.ids.write().await;
        if ids.remove(user_id) {
            false
        } else {
            ids.insert(user_id.to_string());
            true
        }
    }

    pub async fn is_blocked(&self, user_id: &str) -> bool {
        self.ids.read().await.contains(user_id)
    }

    pub async fn blocked(&self) -> Vec<String> {
        let mut out: Vec<String> = self.ids.read().await.iter().cloned().collect();
        out.sort();
        out
    }

    pub async fn reset(&self) {
        self.ids.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_block_toggle_reset() {
        let list = BlockList::new();
        assert!(list.block("3").await);
        assert!(!list.block("3").await);
        assert!(list.is_blocked("3").await);

        assert!(!list.toggle("3").await);
        assert!(!list.is_blocked("3").await);
        assert!(list.toggle("5").await);
        list.block("1").await;
        assert_eq!(list.blocked().await, vec!["1".to_string(), "5".to_string()]);

        assert!(list.unblock("1").await);
        list.reset().await;
        assert!(list.blocked().await.is_empty());
    }
}
