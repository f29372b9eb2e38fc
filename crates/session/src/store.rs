use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use govform_core::{AppConfig, JourneySession, WizardError};
use thiserror::Error;
use tracing::warn;

use crate::client::RedisSessionStore;
use crate::local::MemorySessionStore;

const EVICTION_PERIOD: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<SessionError> for WizardError {
    fn from(err: SessionError) -> Self {
        WizardError::collaborator(err.to_string())
    }
}

/// Persistence for [`JourneySession`]s keyed by session id.
///
/// Writes are whole-session and last write wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<JourneySession>, SessionError>;

    /// Stores the session and restarts its expiry.
    async fn save(&self, id: &str, session: &JourneySession) -> Result<(), SessionError>;

    /// Removes the session; missing ids are not an error.
    async fn destroy(&self, id: &str) -> Result<(), SessionError>;
}

/// Redis when `redis.connection_string` or `redis.host` is configured,
/// otherwise an in-process store.
pub async fn connect(config: &AppConfig) -> Result<Arc<dyn SessionStore>, SessionError> {
    match RedisSessionStore::url(&config.redis) {
        Some(url) => {
            let store = RedisSessionStore::connect(&url, config).await?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("Redis is not configured, using in-memory sessions that are lost on restart");
            let store = MemorySessionStore::new(config.session.ttl_secs);
            store.spawn_eviction(EVICTION_PERIOD);
            Ok(Arc::new(store))
        }
    }
}
