//! Redis cache backend.

use crate::cache::{connected, sequence_key, Cache};
use crate::error::{Error, Result};
use crate::options::{PolicyOption, SetterOption};
use crate::pool::{release_on_drop, PoolSession, SessionPool};
use crate::registry::DriverRegistry;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;

/// Canonical registry name for this driver.
pub const DRIVER_NAME: &str = "redis";

/// One multiplexed, auto-reconnecting connection per address, shared by
/// every handle bound to it. `ConnectionManager` is internally clonable,
/// so concurrent commands from different handles interleave safely.
pub struct RedisSession {
    manager: ConnectionManager,
}

impl RedisSession {
    async fn open(address: &str) -> Result<Self> {
        let url = if address.contains("://") {
            address.to_string()
        } else {
            format!("redis://{}", address)
        };

        let client = redis::Client::open(url).map_err(|e| {
            warn!("✗ redis address rejected: {}", e);
            Error::InvalidConnectionString
        })?;
        let mut manager = ConnectionManager::new(client).await?;

        // reachability check; construction fails if the server is down
        redis::cmd("PING").query_async::<String>(&mut manager).await?;

        debug!("✓ redis session open: {}", address);
        Ok(RedisSession { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl PoolSession for RedisSession {
    async fn teardown(&self) {
        // flush the database on last release, mirroring truncate
        let mut conn = self.conn();
        if let Err(e) = redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await {
            warn!("redis teardown flush failed: {}", e);
        }
        debug!("✓ redis session torn down");
    }
}

/// Shared pool of redis sessions, cloned into every handle this driver
/// produces.
#[derive(Clone, Default)]
pub struct RedisDriver {
    pool: Arc<SessionPool<RedisSession>>,
}

impl RedisDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh, unconnected handle participating in this driver's pool.
    pub fn new_cache(&self) -> Box<dyn Cache> {
        Box::new(RedisCache {
            address: None,
            session: None,
            policy: PolicyOption::default(),
            pool: self.pool.clone(),
        })
    }

    /// Register this driver under [`DRIVER_NAME`].
    pub fn register(&self, registry: &DriverRegistry) {
        let driver = self.clone();
        registry.register(DRIVER_NAME, move || driver.new_cache());
    }

    /// The driver's session pool, for refcount introspection.
    pub fn pool(&self) -> &Arc<SessionPool<RedisSession>> {
        &self.pool
    }
}

/// Cache handle backed by a redis server.
pub struct RedisCache {
    address: Option<String>,
    session: Option<Arc<RedisSession>>,
    policy: PolicyOption,
    pool: Arc<SessionPool<RedisSession>>,
}

#[async_trait]
impl Cache for RedisCache {
    async fn connect(&mut self, address: &str, policy: PolicyOption) -> Result<()> {
        self.close().await?;

        if address.is_empty() {
            return Err(Error::InvalidConnectionString);
        }

        let session = self
            .pool
            .acquire(address, || RedisSession::open(address))
            .await?;

        self.address = Some(address.to_string());
        self.session = Some(session);
        self.policy = policy;
        debug!("✓ redis cache connected to {}", address);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let (Some(address), Some(_session)) = (self.address.take(), self.session.take()) {
            self.pool.release(&address).await;
        }
        Ok(())
    }

    async fn truncate(&self) -> Result<()> {
        let mut conn = connected(&self.session)?.conn();
        redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await?;
        warn!("⚠ redis FLUSHDB executed - all keys in the shared session cleared");
        Ok(())
    }

    async fn get_raw(&self, key: &str) -> Result<Vec<u8>> {
        let mut conn = connected(&self.session)?.conn();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        value.ok_or(Error::NotExist)
    }

    async fn is_exist(&self, key: &str) -> Result<bool> {
        let mut conn = connected(&self.session)?.conn();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn set_raw(&self, key: &str, value: Vec<u8>, opt: SetterOption) -> Result<()> {
        let mut conn = connected(&self.session)?.conn();
        match opt.ttl() {
            // millisecond precision so sub-second policies round-trip
            Some(ttl) => conn.pset_ex::<_, _, ()>(key, value, ttl.as_millis() as u64).await?,
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn next_sequence(&self, name: &str) -> Result<u64> {
        let mut conn = connected(&self.session)?.conn();
        // INCR atomically initializes a missing counter to 0 first, so the
        // first caller observes 1 with no read-modify-write window
        let value: u64 = conn.incr(sequence_key(name), 1u64).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = connected(&self.session)?.conn();
        // DEL of an absent key returns 0, not an error
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    fn default_setter(&self) -> SetterOption {
        SetterOption::from_policy(&self.policy)
    }
}

impl Drop for RedisCache {
    fn drop(&mut self) {
        release_on_drop(&self.pool, self.address.take(), self.session.take());
    }
}
