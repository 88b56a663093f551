//! Coordination store selection.

use crate::{MemoryStore, RedisStore};
use kiln_core::Result;
use kiln_core::ports::CoordinationStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    /// Process-local; nothing survives a restart or is shared between workers.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_url")]
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_url(),
        }
    }
}

fn default_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

/// Connect the coordination store selected by configuration.
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn CoordinationStore>> {
    match config.backend {
        StoreBackend::Redis => Ok(Arc::new(RedisStore::connect(&config.url).await?)),
        StoreBackend::Memory => {
            warn!("Using the in-process coordination store, state is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::keys;

    #[test]
    fn test_defaults_to_redis() {
        let config = StoreConfig::default();
        assert_eq!(config.backend, StoreBackend::Redis);
        assert_eq!(config.url, "redis://127.0.0.1:6379/");
    }

    #[tokio::test]
    async fn test_memory_backend_needs_no_server() {
        let config = StoreConfig {
            backend: StoreBackend::Memory,
            ..StoreConfig::default()
        };
        let store = create_store(&config).await.unwrap();
        store.list_push(keys::BUILD_QUEUE, b"job").await.unwrap();
        assert_eq!(store.list_length(keys::BUILD_QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_bad_redis_url_is_a_store_error() {
        let config = StoreConfig {
            backend: StoreBackend::Redis,
            url: "not-a-url".to_string(),
        };
        assert!(matches!(
            create_store(&config).await,
            Err(kiln_core::Error::Store(_))
        ));
    }
}
