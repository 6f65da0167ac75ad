//! Live ConversationSession store: optional Redis-backed KV in front of an
//! in-process fallback map. SPEC_FULL.md §4.7, §7 SessionStoreError.
//!
//! Grounded on the teacher's `SessionStore` (JSON-file-backed map behind a
//! `parking_lot::RwLock`) for the in-process tier's shape, generalized with
//! a Redis tier on top per the optional-KV contract in §5 ("Session store
//! KV... Optional"). When Redis is unreachable the store falls through to
//! the in-process map and flags `redis_available=false`; it never returns
//! an error to the caller for that reason alone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use redis::AsyncCommands;
use ringline_domain::config::SessionStoreConfig;
use ringline_domain::error::Result;
use ringline_domain::model::ConversationSession;

struct FallbackEntry {
    session: ConversationSession,
    expires_at: Instant,
}

/// Two-tier store: Redis when configured and reachable, an in-process map
/// always, as a fallback. Keys are `{key_prefix}{call_sid}`.
pub struct SessionStore {
    redis: Option<redis::Client>,
    key_prefix: String,
    ttl: Duration,
    fallback: RwLock<HashMap<String, FallbackEntry>>,
    redis_available: AtomicBool,
}

impl SessionStore {
    pub fn new(cfg: &SessionStoreConfig) -> Result<Self> {
        let redis = match &cfg.redis_url {
            Some(url) => match redis::Client::open(url.as_str()) {
                Ok(client) => Some(client),
                Err(e) => {
                    tracing::warn!(error = %e, "invalid redis url, using in-process store only");
                    None
                }
            },
            None => None,
        };
        let redis_available = redis.is_some();
        Ok(Self {
            redis,
            key_prefix: cfg.key_prefix.clone(),
            ttl: Duration::from_secs(cfg.ttl_secs),
            fallback: RwLock::new(HashMap::new()),
            redis_available: AtomicBool::new(redis_available),
        })
    }

    fn key(&self, call_sid: &str) -> String {
        format!("{}{}", self.key_prefix, call_sid)
    }

    pub fn redis_available(&self) -> bool {
        self.redis_available.load(Ordering::Relaxed)
    }

    /// Used by `/ready` (§4.13). The in-process fallback is always
    /// reachable, so this only reports the Redis tier when configured.
    pub async fn is_reachable(&self) -> bool {
        if self.redis.is_some() {
            self.redis_available()
        } else {
            true
        }
    }

    /// Fetch and refresh TTL on hit, per the GET/SET-EX contract in §5.
    pub async fn get(&self, call_sid: &str) -> Option<ConversationSession> {
        if let Some(session) = self.get_from_redis(call_sid).await {
            return Some(session);
        }
        self.get_from_fallback(call_sid)
    }

    async fn get_from_redis(&self, call_sid: &str) -> Option<ConversationSession> {
        let client = self.redis.as_ref()?;
        let mut conn = match client.get_multiplexed_async_connection().await {
            Ok(c) => c,
            Err(e) => {
                self.mark_unavailable(&e);
                return None;
            }
        };
        let key = self.key(call_sid);
        let raw: Option<String> = match conn.get(&key).await {
            Ok(v) => v,
            Err(e) => {
                self.mark_unavailable(&e);
                return None;
            }
        };
        self.redis_available.store(true, Ordering::Relaxed);
        let raw = raw?;
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(call_sid, error = %e, "corrupt session payload in redis");
                None
            }
        }
    }

    fn get_from_fallback(&self, call_sid: &str) -> Option<ConversationSession> {
        let key = self.key(call_sid);
        let fallback = self.fallback.read();
        let entry = fallback.get(&key)?;
        if entry.expires_at < Instant::now() {
            return None;
        }
        Some(entry.session.clone())
    }

    /// Write-through: always updates the in-process map; also pushes to
    /// Redis when reachable, refreshing TTL either way.
    pub async fn put(&self, session: &ConversationSession) -> Result<()> {
        {
            let mut fallback = self.fallback.write();
            fallback.insert(
                self.key(&session.call_sid),
                FallbackEntry {
                    session: session.clone(),
                    expires_at: Instant::now() + self.ttl,
                },
            );
        }

        if let Some(client) = &self.redis {
            let key = self.key(&session.call_sid);
            let payload = serde_json::to_string(session)?;
            match client.get_multiplexed_async_connection().await {
                Ok(mut conn) => {
                    let res: std::result::Result<(), redis::RedisError> = conn
                        .set_ex(&key, payload, self.ttl.as_secs())
                        .await;
                    if let Err(e) = res {
                        self.mark_unavailable(&e);
                    } else {
                        self.redis_available.store(true, Ordering::Relaxed);
                    }
                }
                Err(e) => self.mark_unavailable(&e),
            }
        }

        Ok(())
    }

    pub async fn delete(&self, call_sid: &str) {
        self.fallback.write().remove(&self.key(call_sid));

        if let Some(client) = &self.redis {
            if let Ok(mut conn) = client.get_multiplexed_async_connection().await {
                let _: std::result::Result<(), redis::RedisError> =
                    conn.del(self.key(call_sid)).await;
            }
        }
    }

    /// `SCAN MATCH` over the fallback map; Redis-only keys are not
    /// enumerable without a live connection and are not needed by the
    /// scheduler, which tracks active calls via the durable store instead.
    pub fn list_active_keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.fallback
            .read()
            .iter()
            .filter(|(_, v)| v.expires_at >= now)
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn mark_unavailable(&self, err: &redis::RedisError) {
        if self.redis_available.swap(false, Ordering::Relaxed) {
            tracing::warn!(error = %err, "redis unreachable, falling through to in-process store");
        }
    }
}

pub type SharedSessionStore = Arc<SessionStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn cfg() -> SessionStoreConfig {
        SessionStoreConfig {
            redis_url: None,
            ttl_secs: 3600,
            key_prefix: "ringline:session:".into(),
        }
    }

    fn session(call_sid: &str) -> ConversationSession {
        ConversationSession::new(
            call_sid.into(),
            "ST1".into(),
            Uuid::new_v4(),
            "Rajesh".into(),
            None,
            None,
            None,
        )
    }

    #[tokio::test]
    async fn put_then_get_roundtrips_without_redis() {
        let store = SessionStore::new(&cfg()).unwrap();
        assert!(!store.redis_available());
        let s = session("CA1");
        store.put(&s).await.unwrap();
        let fetched = store.get("CA1").await.unwrap();
        assert_eq!(fetched.call_sid, "CA1");
    }

    #[tokio::test]
    async fn delete_removes_from_fallback() {
        let store = SessionStore::new(&cfg()).unwrap();
        store.put(&session("CA1")).await.unwrap();
        store.delete("CA1").await;
        assert!(store.get("CA1").await.is_none());
    }

    #[tokio::test]
    async fn list_active_keys_includes_live_sessions() {
        let store = SessionStore::new(&cfg()).unwrap();
        store.put(&session("CA1")).await.unwrap();
        store.put(&session("CA2")).await.unwrap();
        let keys = store.list_active_keys();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn unknown_session_returns_none() {
        let store = SessionStore::new(&cfg()).unwrap();
        assert!(store.get("missing").await.is_none());
    }
}
