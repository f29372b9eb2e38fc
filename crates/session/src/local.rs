//! In-process session store backed by DashMap. Used when Redis is not
//! configured and in tests; contents are lost on restart.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use govform_core::JourneySession;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::store::{SessionError, SessionStore};

struct SessionEntry {
    // Serialized so that loads hand out independent copies.
    json: String,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct MemorySessionStore {
    store: Arc<DashMap<String, SessionEntry>>,
    ttl: Duration,
}

impl MemorySessionStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Remove expired entries.
    pub fn evict_expired(&self) -> usize {
        evict(&self.store)
    }

    /// Evicts expired sessions every `period` until the store is dropped.
    pub fn spawn_eviction(&self, period: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(&self.store);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let evicted = evict(&store);
                if evicted > 0 {
                    debug!(evicted = evicted, "Expired sessions evicted");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

fn evict(store: &DashMap<String, SessionEntry>) -> usize {
    let before = store.len();
    let now = Instant::now();
    store.retain(|_, entry| entry.expires_at > now);
    before.saturating_sub(store.len())
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<JourneySession>, SessionError> {
        let Some(entry) = self.store.get(id) else {
            return Ok(None);
        };
        if Instant::now() >= entry.expires_at {
            drop(entry);
            self.store.remove(id);
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&entry.json)?))
    }

    async fn save(&self, id: &str, session: &JourneySession) -> Result<(), SessionError> {
        let json = serde_json::to_string(session)?;
        self.store.insert(
            id.to_string(),
            SessionEntry {
                json,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<(), SessionError> {
        self.store.remove(id);
        Ok(())
    }
}
