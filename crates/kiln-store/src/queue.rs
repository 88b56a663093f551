//! Job queue backed by a coordination store list.

use async_trait::async_trait;
use kiln_core::Result;
use kiln_core::keys;
use kiln_core::ports::{CoordinationStore, JobQueue};
use std::sync::Arc;

/// Pushes to the tail and pops from the head of one store list.
pub struct StoreQueue {
    store: Arc<dyn CoordinationStore>,
    list: String,
}

impl StoreQueue {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self::with_list(store, keys::BUILD_QUEUE)
    }

    pub fn with_list(store: Arc<dyn CoordinationStore>, list: impl Into<String>) -> Self {
        Self {
            store,
            list: list.into(),
        }
    }
}

#[async_trait]
impl JobQueue for StoreQueue {
    async fn push(&self, payload: Vec<u8>) -> Result<()> {
        self.store.list_push(&self.list, &payload).await
    }

    async fn pop(&self) -> Result<Option<Vec<u8>>> {
        self.store.list_pop(&self.list).await
    }

    async fn len(&self) -> Result<usize> {
        self.store.list_length(&self.list).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[tokio::test]
    async fn test_queue_uses_build_queue_list() {
        let store = Arc::new(MemoryStore::new());
        let queue = StoreQueue::new(store.clone());

        queue.push(b"first".to_vec()).await.unwrap();
        queue.push(b"second".to_vec()).await.unwrap();

        assert_eq!(store.list_length(keys::BUILD_QUEUE).await.unwrap(), 2);
        assert_eq!(queue.pop().await.unwrap(), Some(b"first".to_vec()));
        assert_eq!(queue.len().await.unwrap(), 1);
    }
}
