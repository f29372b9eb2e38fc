//! Redis-backed session store. Sessions are JSON strings stored with
//! `SET EX` under `{key_prefix}:{id}`.

use async_trait::async_trait;
use govform_core::config::RedisConfig;
use govform_core::{AppConfig, JourneySession};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::store::{SessionError, SessionStore};

pub struct RedisSessionStore {
    conn: ConnectionManager,
    prefix: String,
    ttl_secs: u64,
}

impl RedisSessionStore {
    /// Connection URL from `connection_string`, or from `host`/`port`.
    pub fn url(config: &RedisConfig) -> Option<String> {
        match (&config.connection_string, &config.host) {
            (Some(url), _) if !url.is_empty() => Some(url.clone()),
            (_, Some(host)) if !host.is_empty() => Some(format!("redis://{host}:{}", config.port)),
            _ => None,
        }
    }

    pub async fn connect(url: &str, config: &AppConfig) -> Result<Self, SessionError> {
        info!(url = %redacted(url), "Connecting to Redis");

        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;

        let name = client_name(&config.app_name);
        redis::cmd("CLIENT")
            .arg("SETNAME")
            .arg(&name)
            .query_async::<_, ()>(&mut conn)
            .await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(response = %pong, client = %name, "Redis connection established");

        Ok(Self {
            conn,
            prefix: config.redis.key_prefix.clone(),
            ttl_secs: config.session.ttl_secs,
        })
    }

    fn key(&self, id: &str) -> String {
        session_key(&self.prefix, id)
    }
}

pub(crate) fn session_key(prefix: &str, id: &str) -> String {
    format!("{prefix}:{id}")
}

/// `{app}:{host}:{pid}`, shown by `CLIENT LIST`.
pub(crate) fn client_name(app_name: &str) -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    let host = host.split('.').next().unwrap_or_default();
    format!("{app_name}:{host}:{}", std::process::id())
}

fn redacted(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => format!("{}***{}", &url[..scheme + 3], &url[at..]),
        _ => url.to_string(),
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, id: &str) -> Result<Option<JourneySession>, SessionError> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(self.key(id)).await?;
        match data {
            Some(json) => {
                metrics::counter!("session.load.hit").increment(1);
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => {
                metrics::counter!("session.load.miss").increment(1);
                debug!(session = id, "Session not found");
                Ok(None)
            }
        }
    }

    async fn save(&self, id: &str, session: &JourneySession) -> Result<(), SessionError> {
        let json = serde_json::to_string(session)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.key(id), json, self.ttl_secs)
            .await?;
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.key(id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_from_config() {
        let mut config = RedisConfig::default();
        assert_eq!(RedisSessionStore::url(&config), None);

        config.host = Some("cache.internal".into());
        assert_eq!(
            RedisSessionStore::url(&config).as_deref(),
            Some("redis://cache.internal:6379")
        );

        config.connection_string = Some("redis://:secret@other:6380".into());
        assert_eq!(
            RedisSessionStore::url(&config).as_deref(),
            Some("redis://:secret@other:6380")
        );
    }

    #[test]
    fn test_key_and_client_name() {
        assert_eq!(session_key("sess", "abc"), "sess:abc");
        let name = client_name("govform");
        assert!(name.starts_with("govform:"));
        assert!(name.ends_with(&format!(":{}", std::process::id())));
    }

    #[test]
    fn test_redacts_credentials() {
        assert_eq!(redacted("redis://:secret@host:6379"), "redis://***@host:6379");
        assert_eq!(redacted("redis://host:6379"), "redis://host:6379");
    }
}
