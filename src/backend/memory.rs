//! In-process cache backend.

use crate::cache::{connected, sequence_key, Cache};
use crate::error::{Error, Result};
use crate::options::{PolicyOption, SetterOption};
use crate::pool::{release_on_drop, PoolSession, SessionPool};
use crate::registry::DriverRegistry;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Canonical registry name for this driver.
pub const DRIVER_NAME: &str = "memory";

/// The only address this driver accepts; it never leaves the process.
const LOCAL_ADDRESS: &str = "localhost";

struct Entry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }
}

#[derive(Default)]
struct Store {
    entries: DashMap<String, Entry>,
}

impl Store {
    fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }
}

/// One shared in-process store per address, owned by the session pool.
///
/// Entries expire lazily on read; a janitor task additionally sweeps the
/// map every `purge_interval` of the first connector's policy (no janitor
/// runs when the interval is zero).
pub struct MemorySession {
    store: Arc<Store>,
    janitor: Option<JoinHandle<()>>,
}

impl MemorySession {
    fn open(policy: PolicyOption) -> Self {
        let store = Arc::new(Store::default());

        let janitor = if policy.purge_interval.is_zero() {
            None
        } else {
            Some(spawn_janitor(Arc::downgrade(&store), policy.purge_interval))
        };

        MemorySession { store, janitor }
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        let expired = match self.store.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.data.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            // lazy expiry; remove the ref before mutating to avoid deadlock
            self.store.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        None
    }

    fn set(&self, key: &str, data: Vec<u8>, ttl: Option<Duration>) {
        let entry = Entry {
            data,
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.store.entries.insert(key.to_string(), entry);
    }

    /// Atomic initialize-or-increment under the map's shard lock.
    /// Counters are 8-byte little-endian and never expire.
    fn next_sequence(&self, key: String) -> Result<u64> {
        let mut entry = self.store.entries.entry(key).or_insert_with(|| Entry {
            data: 0u64.to_le_bytes().to_vec(),
            expires_at: None,
        });

        let bytes: [u8; 8] = entry
            .data
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidArgument)?;
        let next = u64::from_le_bytes(bytes) + 1;
        entry.data = next.to_le_bytes().to_vec();
        Ok(next)
    }
}

fn spawn_janitor(store: Weak<Store>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick completes immediately
        loop {
            ticker.tick().await;
            let Some(store) = store.upgrade() else { break };
            store.purge_expired();
        }
    })
}

#[async_trait]
impl PoolSession for MemorySession {
    async fn teardown(&self) {
        if let Some(janitor) = &self.janitor {
            janitor.abort();
        }
        self.store.entries.clear();
        debug!("✓ memory session torn down");
    }
}

/// Shared pool of in-process sessions, cloned into every handle this
/// driver produces so they share sessions by address.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    pool: Arc<SessionPool<MemorySession>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh, unconnected handle participating in this driver's pool.
    pub fn new_cache(&self) -> Box<dyn Cache> {
        Box::new(MemoryCache {
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
    pub fn pool(&self) -> &Arc<SessionPool<MemorySession>> {
        &self.pool
    }
}

/// Cache handle backed by the in-process store.
pub struct MemoryCache {
    address: Option<String>,
    session: Option<Arc<MemorySession>>,
    policy: PolicyOption,
    pool: Arc<SessionPool<MemorySession>>,
}

#[async_trait]
impl Cache for MemoryCache {
    async fn connect(&mut self, address: &str, policy: PolicyOption) -> Result<()> {
        self.close().await?;

        if address != LOCAL_ADDRESS {
            warn!("✗ memory driver rejects non-local address: {}", address);
            return Err(Error::InvalidHost);
        }

        let session = self
            .pool
            .acquire(address, move || async move { Ok(MemorySession::open(policy)) })
            .await?;

        self.address = Some(address.to_string());
        self.session = Some(session);
        self.policy = policy;
        debug!("✓ memory cache connected to {}", address);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let (Some(address), Some(_session)) = (self.address.take(), self.session.take()) {
            self.pool.release(&address).await;
        }
        Ok(())
    }

    async fn truncate(&self) -> Result<()> {
        let session = connected(&self.session)?;
        session.store.entries.clear();
        Ok(())
    }

    async fn get_raw(&self, key: &str) -> Result<Vec<u8>> {
        let session = connected(&self.session)?;
        session.get(key).ok_or(Error::NotExist)
    }

    async fn is_exist(&self, key: &str) -> Result<bool> {
        let session = connected(&self.session)?;
        Ok(session.get(key).is_some())
    }

    async fn set_raw(&self, key: &str, value: Vec<u8>, opt: SetterOption) -> Result<()> {
        let session = connected(&self.session)?;
        session.set(key, value, opt.ttl());
        Ok(())
    }

    async fn next_sequence(&self, name: &str) -> Result<u64> {
        let session = connected(&self.session)?;
        session.next_sequence(sequence_key(name))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let session = connected(&self.session)?;
        session.store.entries.remove(key);
        Ok(())
    }

    fn default_setter(&self) -> SetterOption {
        SetterOption::from_policy(&self.policy)
    }
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        release_on_drop(&self.pool, self.address.take(), self.session.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheExt;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        id: String,
        count: u32,
    }

    fn payload() -> Payload {
        Payload {
            id: "p-1".to_string(),
            count: 3,
        }
    }

    async fn connected_cache(driver: &MemoryDriver) -> Box<dyn Cache> {
        connected_cache_with(driver, PolicyOption::default()).await
    }

    async fn connected_cache_with(driver: &MemoryDriver, policy: PolicyOption) -> Box<dyn Cache> {
        let mut cache = driver.new_cache();
        cache
            .connect(LOCAL_ADDRESS, policy)
            .await
            .expect("connect failed");
        cache
    }

    #[tokio::test]
    async fn test_connect_rejects_non_local_address() {
        let driver = MemoryDriver::new();
        let mut cache = driver.new_cache();

        let err = cache
            .connect("10.0.0.1:6379", PolicyOption::default())
            .await
            .expect_err("non-local address must fail");
        assert!(matches!(err, Error::InvalidHost));
        assert!(!driver.pool().contains("10.0.0.1:6379").await);
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let driver = MemoryDriver::new();
        let cache = connected_cache(&driver).await;

        cache.set("k", &payload()).await.expect("set failed");
        let back: Payload = cache.get("k").await.expect("get failed");
        assert_eq!(back, payload());
    }

    #[tokio::test]
    async fn test_get_absent_key() {
        let driver = MemoryDriver::new();
        let cache = connected_cache(&driver).await;

        let err = cache.get::<Payload>("missing").await.expect_err("absent key");
        assert!(matches!(err, Error::NotExist));
        assert!(!cache.is_exist("missing").await.expect("is_exist failed"));
    }

    #[tokio::test]
    async fn test_malformed_bytes_are_a_serialization_error() {
        let driver = MemoryDriver::new();
        let cache = connected_cache(&driver).await;

        cache
            .set_raw("garbled", b"\x00\x01not-json".to_vec(), SetterOption::default())
            .await
            .expect("set_raw failed");

        let err = cache.get::<Payload>("garbled").await.expect_err("bad bytes");
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let driver = MemoryDriver::new();
        let cache = connected_cache(&driver).await;

        cache.set("k", &payload()).await.expect("set failed");
        cache.delete("k").await.expect("delete failed");
        cache.delete("k").await.expect("deleting absent key must succeed");

        let err = cache.get::<Payload>("k").await.expect_err("deleted key");
        assert!(matches!(err, Error::NotExist));
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let driver = MemoryDriver::new();
        let cache = connected_cache(&driver).await;

        cache
            .set_with("short", &payload(), SetterOption::expires_in(Duration::from_millis(40)))
            .await
            .expect("set_with failed");

        let back: Payload = cache.get("short").await.expect("still fresh");
        assert_eq!(back, payload());

        tokio::time::sleep(Duration::from_millis(80)).await;
        let err = cache.get::<Payload>("short").await.expect_err("expired");
        assert!(matches!(err, Error::NotExist));
    }

    #[tokio::test]
    async fn test_no_expiration_outlives_default_policy() {
        let driver = MemoryDriver::new();
        let policy = PolicyOption::new(Duration::from_millis(40), Duration::ZERO);
        let cache = connected_cache_with(&driver, policy).await;

        cache
            .set_with("pinned", &payload(), SetterOption::never_expires())
            .await
            .expect("set_with failed");
        cache.set("fleeting", &payload()).await.expect("set failed");

        tokio::time::sleep(Duration::from_millis(80)).await;

        let back: Payload = cache.get("pinned").await.expect("must not expire");
        assert_eq!(back, payload());
        assert!(matches!(
            cache.get::<Payload>("fleeting").await,
            Err(Error::NotExist)
        ));
    }

    #[tokio::test]
    async fn test_janitor_purges_expired_entries() {
        let policy = PolicyOption::new(Duration::ZERO, Duration::from_millis(20));
        let session = MemorySession::open(policy);

        session.set("swept", b"x".to_vec(), Some(Duration::from_millis(30)));
        session.set("kept", b"y".to_vec(), None);

        tokio::time::sleep(Duration::from_millis(120)).await;

        // entry removed by the sweep, not just hidden by lazy expiry
        assert!(!session.store.entries.contains_key("swept"));
        assert!(session.store.entries.contains_key("kept"));
        session.teardown().await;
    }

    #[tokio::test]
    async fn test_insert_generates_unique_keys() {
        let driver = MemoryDriver::new();
        let cache = connected_cache(&driver).await;

        let k1 = cache.insert(&payload()).await.expect("insert failed");
        let k2 = cache.insert(&payload()).await.expect("insert failed");
        assert_ne!(k1, k2);

        let back: Payload = cache.get(&k1).await.expect("get failed");
        assert_eq!(back, payload());
    }

    #[tokio::test]
    async fn test_next_sequence_counts_from_one() {
        let driver = MemoryDriver::new();
        let cache = connected_cache(&driver).await;

        assert_eq!(cache.next_sequence("jobs").await.expect("seq failed"), 1);
        assert_eq!(cache.next_sequence("jobs").await.expect("seq failed"), 2);
        assert_eq!(cache.next_sequence("other").await.expect("seq failed"), 1);
        assert_eq!(cache.next_sequence("jobs").await.expect("seq failed"), 3);
    }

    #[tokio::test]
    async fn test_sequence_keys_do_not_collide_with_user_keys() {
        let driver = MemoryDriver::new();
        let cache = connected_cache(&driver).await;

        cache.set("jobs", &payload()).await.expect("set failed");
        assert_eq!(cache.next_sequence("jobs").await.expect("seq failed"), 1);

        let back: Payload = cache.get("jobs").await.expect("get failed");
        assert_eq!(back, payload());
    }

    #[tokio::test]
    async fn test_operations_after_close_fail() {
        let driver = MemoryDriver::new();
        let mut cache = connected_cache(&driver).await;

        cache.close().await.expect("close failed");
        assert!(matches!(
            cache.get::<Payload>("k").await,
            Err(Error::InvalidCache)
        ));
        assert!(matches!(cache.set("k", &1u32).await, Err(Error::InvalidCache)));
        assert!(matches!(cache.truncate().await, Err(Error::InvalidCache)));

        // close is idempotent
        cache.close().await.expect("double close must succeed");
    }

    #[tokio::test]
    async fn test_reconnect_after_close() {
        let driver = MemoryDriver::new();
        let mut cache = connected_cache(&driver).await;

        cache.close().await.expect("close failed");
        cache
            .connect(LOCAL_ADDRESS, PolicyOption::default())
            .await
            .expect("reconnect failed");
        cache.set("k", &payload()).await.expect("set failed");
    }

    #[tokio::test]
    async fn test_refcount_lifecycle_through_handles() {
        let driver = MemoryDriver::new();
        let mut a = connected_cache(&driver).await;
        let mut b = connected_cache(&driver).await;

        assert_eq!(driver.pool().retain_count(LOCAL_ADDRESS).await, Some(2));

        a.close().await.expect("close failed");
        assert_eq!(driver.pool().retain_count(LOCAL_ADDRESS).await, Some(1));

        b.close().await.expect("close failed");
        assert!(!driver.pool().contains(LOCAL_ADDRESS).await);

        // further closes after the pool is empty are no-ops
        b.close().await.expect("close after teardown must succeed");
    }

    #[tokio::test]
    async fn test_dropped_handle_releases_eventually() {
        let driver = MemoryDriver::new();
        {
            let _cache = connected_cache(&driver).await;
            assert_eq!(driver.pool().retain_count(LOCAL_ADDRESS).await, Some(1));
        }

        // the drop safety net spawned a release task; give it a chance to run
        for _ in 0..50 {
            if !driver.pool().contains(LOCAL_ADDRESS).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("dropped handle never released its session");
    }
}
