//! Memcached cache backend.

use crate::cache::{connected, sequence_key, Cache};
use crate::error::{Error, Result};
use crate::options::{PolicyOption, SetterOption};
use crate::pool::{release_on_drop, PoolSession, SessionPool};
use crate::registry::DriverRegistry;
use async_memcached::AsciiProtocol;
use async_trait::async_trait;
use deadpool_memcached::{Manager, Pool};
use std::sync::Arc;

/// Canonical registry name for this driver.
pub const DRIVER_NAME: &str = "memcached";

/// Default Memcached connection pool size.
/// Formula: (CPU cores × 2) + 1
/// For 8-core systems: 16 connections is optimal
/// Override with MEMCACHED_POOL_SIZE environment variable
const DEFAULT_POOL_SIZE: usize = 16;

/// Probe key for the connect-time reachability check; a miss on it is
/// expected and tolerated.
const PING_KEY: &str = "__ping__";

fn is_not_found(err: &impl std::fmt::Display) -> bool {
    err.to_string().contains("not found")
}

/// One connection pool per address, shared by every handle bound to it.
///
/// Memcached's client takes `&mut self` per command, so the shared session
/// is a small connection pool rather than a single multiplexed socket;
/// the session itself is still created once per address, refcounted, and
/// flushed on last release.
pub struct MemcachedSession {
    pool: Pool,
}

impl MemcachedSession {
    async fn open(address: &str) -> Result<Self> {
        let pool_size = std::env::var("MEMCACHED_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(DEFAULT_POOL_SIZE);

        let manager = Manager::new(address.to_string());
        let pool = Pool::builder(manager)
            .max_size(pool_size)
            .build()
            .map_err(|e| Error::Backend(format!("Failed to create connection pool: {}", e)))?;

        // reachability check; a miss on the probe key is fine, a transport
        // error is not
        let mut conn = pool
            .get()
            .await
            .map_err(|e| Error::Backend(format!("Failed to get Memcached connection: {}", e)))?;
        if let Err(e) = conn.get(PING_KEY).await {
            if !is_not_found(&e) {
                return Err(Error::Backend(format!("Memcached unreachable: {}", e)));
            }
        }

        debug!("✓ memcached session open: {} (pool size: {})", address, pool_size);
        Ok(MemcachedSession { pool })
    }

    async fn conn(
        &self,
    ) -> Result<impl std::ops::DerefMut<Target = async_memcached::Client>> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::Backend(format!("Failed to get Memcached connection: {}", e)))
    }

    async fn flush(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.flush_all()
            .await
            .map_err(|e| Error::Backend(format!("Memcached FLUSH_ALL failed: {}", e)))?;
        warn!("⚠ Memcached FLUSH_ALL executed - all keys in the shared session cleared");
        Ok(())
    }
}

#[async_trait]
impl PoolSession for MemcachedSession {
    async fn teardown(&self) {
        if let Err(e) = self.flush().await {
            warn!("memcached teardown flush failed: {}", e);
        }
        debug!("✓ memcached session torn down");
    }
}

/// Shared pool of memcached sessions, cloned into every handle this
/// driver produces.
#[derive(Clone, Default)]
pub struct MemcachedDriver {
    pool: Arc<SessionPool<MemcachedSession>>,
}

impl MemcachedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh, unconnected handle participating in this driver's pool.
    pub fn new_cache(&self) -> Box<dyn Cache> {
        Box::new(MemcachedCache {
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
    pub fn pool(&self) -> &Arc<SessionPool<MemcachedSession>> {
        &self.pool
    }
}

/// Cache handle backed by a memcached server.
pub struct MemcachedCache {
    address: Option<String>,
    session: Option<Arc<MemcachedSession>>,
    policy: PolicyOption,
    pool: Arc<SessionPool<MemcachedSession>>,
}

#[async_trait]
impl Cache for MemcachedCache {
    async fn connect(&mut self, address: &str, policy: PolicyOption) -> Result<()> {
        self.close().await?;

        if address.is_empty() {
            return Err(Error::InvalidConnectionString);
        }

        let session = self
            .pool
            .acquire(address, || MemcachedSession::open(address))
            .await?;

        self.address = Some(address.to_string());
        self.session = Some(session);
        self.policy = policy;
        debug!("✓ memcached cache connected to {}", address);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let (Some(address), Some(_session)) = (self.address.take(), self.session.take()) {
            self.pool.release(&address).await;
        }
        Ok(())
    }

    async fn truncate(&self) -> Result<()> {
        connected(&self.session)?.flush().await
    }

    async fn get_raw(&self, key: &str) -> Result<Vec<u8>> {
        let mut conn = connected(&self.session)?.conn().await?;
        match conn.get(key).await {
            Ok(Some(value)) => value.data.ok_or(Error::NotExist),
            Ok(None) => Err(Error::NotExist),
            Err(e) if is_not_found(&e) => Err(Error::NotExist),
            Err(e) => Err(Error::Backend(format!(
                "Memcached GET failed for key {}: {}",
                key, e
            ))),
        }
    }

    async fn is_exist(&self, key: &str) -> Result<bool> {
        // no native EXISTS; a fetch that misses maps to Ok(false)
        let mut conn = connected(&self.session)?.conn().await?;
        match conn.get(key).await {
            Ok(Some(_)) => Ok(true),
            Ok(None) => Ok(false),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(Error::Backend(format!(
                "Memcached EXISTS check failed for key {}: {}",
                key, e
            ))),
        }
    }

    async fn set_raw(&self, key: &str, value: Vec<u8>, opt: SetterOption) -> Result<()> {
        let mut conn = connected(&self.session)?.conn().await?;

        // Memcached TTLs are whole seconds; values < 30 days are relative.
        // Sub-second TTLs round up so a short-lived entry still expires.
        let expiration = opt.ttl().map(|d| d.as_secs().max(1) as i64);

        conn.set(key, value.as_slice(), expiration, None)
            .await
            .map_err(|e| {
                Error::Backend(format!("Memcached SET failed for key {}: {}", key, e))
            })?;
        Ok(())
    }

    async fn next_sequence(&self, name: &str) -> Result<u64> {
        let key = sequence_key(name);
        let mut conn = connected(&self.session)?.conn().await?;

        match conn.increment(&key, 1).await {
            Ok(value) => Ok(value),
            Err(e) if is_not_found(&e) => {
                // ADD is atomic if-absent: exactly one first caller creates
                // the counter at 1; a raced loser falls through and
                // increments the counter the winner just created
                match conn.add(&key, "1", None, None).await {
                    Ok(()) => Ok(1),
                    Err(_) => conn.increment(&key, 1).await.map_err(|e| {
                        Error::Backend(format!("Memcached INCR failed for {}: {}", key, e))
                    }),
                }
            }
            Err(e) => Err(Error::Backend(format!(
                "Memcached INCR failed for {}: {}",
                key, e
            ))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = connected(&self.session)?.conn().await?;
        match conn.delete(key).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::Backend(format!(
                "Memcached DELETE failed for key {}: {}",
                key, e
            ))),
        }
    }

    fn default_setter(&self) -> SetterOption {
        SetterOption::from_policy(&self.policy)
    }
}

impl Drop for MemcachedCache {
    fn drop(&mut self) {
        release_on_drop(&self.pool, self.address.take(), self.session.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        struct NotFound;
        impl std::fmt::Display for NotFound {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "key not found")
            }
        }
        struct Refused;
        impl std::fmt::Display for Refused {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "connection refused")
            }
        }

        assert!(is_not_found(&NotFound));
        assert!(!is_not_found(&Refused));
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_address() {
        let driver = MemcachedDriver::new();
        let mut cache = driver.new_cache();

        let err = cache
            .connect("", PolicyOption::default())
            .await
            .expect_err("empty address must fail");
        assert!(matches!(err, Error::InvalidConnectionString));
        assert!(driver.pool().is_empty().await);
    }

    #[tokio::test]
    async fn test_operations_require_connect() {
        let driver = MemcachedDriver::new();
        let cache = driver.new_cache();

        assert!(matches!(cache.get_raw("k").await, Err(Error::InvalidCache)));
        assert!(matches!(cache.truncate().await, Err(Error::InvalidCache)));
        assert!(matches!(cache.delete("k").await, Err(Error::InvalidCache)));
    }

    #[tokio::test]
    async fn test_close_before_connect_is_noop() {
        let driver = MemcachedDriver::new();
        let mut cache = driver.new_cache();
        cache.close().await.expect("close of unconnected handle");
        cache.close().await.expect("close is idempotent");
    }
}
