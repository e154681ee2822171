//! State store adapter over Redis.
//!
//! All persistent records (executor counters, cached ratios) are small
//! string values with a TTL. Counter writes are guarded by a per-key lock
//! ([`with_lock`]) so read-decide-write cycles for the same job are
//! serialized across handler invocations, and across replicas if more than
//! one is ever deployed.
//!
//! The lock is the single-instance Redis pattern: `SET key token NX PX ttl`
//! to acquire, and a compare-and-delete script to release so a holder can
//! only remove its own lock. A crashed holder's lock expires on its own
//! after [`LOCK_TTL`].

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use thiserror::Error;
use uuid::Uuid;

use crate::common::keys;

/// How long a holder may keep a lock before it expires on its own.
pub const LOCK_TTL: Duration = Duration::from_secs(5);

/// Hard deadline for acquiring a lock. Must stay below the admission
/// webhook timeout so a contended admission fails open inside its budget.
pub const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll interval while waiting on a contended lock.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store transport error: {0}")]
    Transport(#[source] anyhow::Error),
    #[error("timed out acquiring lock for {key}")]
    LockTimeout { key: String },
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Transport(anyhow!(e))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Capability over the shared key-value store.
///
/// Any single call may fail with a transport error; callers only retry
/// read-modify-write sequences while holding the corresponding lock.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// List keys with the given literal prefix. Used by the reconciler's
    /// reap pass.
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Round-trip a ping; the health endpoint's liveness signal.
    async fn ping(&self) -> StoreResult<()>;

    /// Try once to take the lock for `key`. Returns a holder token on
    /// success, `None` while another holder has it.
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> StoreResult<Option<String>>;

    /// Release a lock if `token` still owns it. Releasing a lock that has
    /// expired and been re-acquired by another holder is a no-op.
    async fn release_lock(&self, key: &str, token: &str) -> StoreResult<()>;
}

/// Run `f` under mutual exclusion on `data_key`.
///
/// Acquisition polls every 50 ms up to [`LOCK_ACQUIRE_TIMEOUT`], then fails
/// with [`StoreError::LockTimeout`]. The release is best-effort: a failed
/// release is logged and left to TTL expiry.
pub async fn with_lock<T, F, Fut>(store: &dyn StateStore, data_key: &str, f: F) -> StoreResult<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = StoreResult<T>>,
{
    let lock = keys::lock_key(data_key);
    let deadline = tokio::time::Instant::now() + LOCK_ACQUIRE_TIMEOUT;
    let token = loop {
        if let Some(token) = store.acquire_lock(&lock, LOCK_TTL).await? {
            break token;
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(StoreError::LockTimeout {
                key: data_key.to_string(),
            });
        }
        tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
    };

    let result = f().await;

    if let Err(e) = store.release_lock(&lock, &token).await {
        tracing::warn!(key = %data_key, error = %e, "failed to release lock; it will expire on its own");
    }
    result
}

/// Redis implementation of [`StateStore`] over a shared auto-reconnecting
/// connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> StoreResult<Option<String>> {
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.map(|_| token))
    }

    async fn release_lock(&self, key: &str, token: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}
