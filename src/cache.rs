//! The unified cache contract implemented by every backend driver.

use crate::error::{Error, Result};
use crate::options::{PolicyOption, SetterOption};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

/// Reserved key namespace for [`Cache::next_sequence`] counters, kept
/// distinct from user keys by a fixed marker.
pub const SEQUENCE_PREFIX: &str = "_seq_";

/// Byte-level driver contract.
///
/// Every backend implements this identically: same error taxonomy, same
/// lifecycle, same TTL semantics, no matter how the backend natively
/// spells "not found" or "never expires". Values are opaque bytes at this
/// level; the typed surface lives in [`CacheExt`].
///
/// # Lifecycle
///
/// A handle starts unconnected. [`Cache::connect`] binds it to a session
/// shared with every other handle on the same address (see
/// [`SessionPool`](crate::SessionPool)); [`Cache::close`] releases that
/// binding and is idempotent. Between `close` and the next `connect`, all
/// other operations fail with [`Error::InvalidCache`].
#[async_trait]
pub trait Cache: Send + Sync {
    /// Bind this handle to `address`, sharing the underlying session with
    /// any other handle connected to the same address.
    ///
    /// An already-connected handle is closed first. The `policy` only
    /// reaches the backend when this call creates the session; on reuse
    /// the first connector's policy stays in effect (the handle still
    /// keeps `policy` for its own per-call defaults).
    ///
    /// # Errors
    ///
    /// - `Error::InvalidHost`: the driver rejects the address outright
    /// - `Error::InvalidConnectionString`: the address cannot be parsed
    /// - `Error::Backend`: the backend is unreachable
    async fn connect(&mut self, address: &str, policy: PolicyOption) -> Result<()>;

    /// Release the shared session. The session itself is torn down only
    /// when the last handle using it closes. Closing an already-closed
    /// handle is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// Flush every key in the shared session, immediately visible to all
    /// handles on the same address.
    async fn truncate(&self) -> Result<()>;

    /// Fetch the stored bytes under `key`, or `Error::NotExist`.
    async fn get_raw(&self, key: &str) -> Result<Vec<u8>>;

    /// Existence check without fetching the value. A missing key is
    /// `Ok(false)`, never an error.
    async fn is_exist(&self, key: &str) -> Result<bool>;

    /// Store `value` under `key`, overwriting any prior entry, with the
    /// TTL described by `opt`.
    async fn set_raw(&self, key: &str, value: Vec<u8>, opt: SetterOption) -> Result<()>;

    /// Atomically increment and return the named counter, initializing it
    /// to 1 on first use. Counters live under [`SEQUENCE_PREFIX`] and
    /// never expire. Concurrent first callers see exactly the values
    /// `1..=n`, with a single winner performing the initialization.
    async fn next_sequence(&self, name: &str) -> Result<u64>;

    /// Remove `key`. Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Per-call default derived from the connect-time policy; used by
    /// [`CacheExt::set`] and [`CacheExt::insert`].
    fn default_setter(&self) -> SetterOption;
}

/// Typed convenience surface over [`Cache`], serializing values as JSON.
///
/// Blanket-implemented for every driver, including `dyn Cache`, so a
/// handle resolved from the [`DriverRegistry`](crate::DriverRegistry) gets
/// the full typed API:
///
/// ```ignore
/// let registry = DriverRegistry::with_builtin_drivers();
/// let mut cache = registry.resolve("memory")?;
/// cache.connect("localhost", PolicyOption::default()).await?;
///
/// cache.set("user:1", &user).await?;
/// let back: User = cache.get("user:1").await?;
/// ```
#[async_trait]
pub trait CacheExt: Cache {
    /// Fetch and deserialize the value stored under `key`.
    ///
    /// # Errors
    ///
    /// - `Error::NotExist`: the key is absent
    /// - `Error::Serialization`: the stored bytes do not decode as `T`
    async fn get<T>(&self, key: &str) -> Result<T>
    where
        T: DeserializeOwned + Send,
    {
        let bytes = self.get_raw(key).await?;
        let value = serde_json::from_slice(&bytes)?;
        Ok(value)
    }

    /// Store `value` under `key` with the connection's default TTL.
    async fn set<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        self.set_with(key, value, self.default_setter()).await
    }

    /// Store `value` under `key` with an explicit TTL override.
    async fn set_with<T>(&self, key: &str, value: &T, opt: SetterOption) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(value)?;
        self.set_raw(key, bytes, opt).await
    }

    /// Store `value` under a freshly generated key and return the key,
    /// using the connection's default TTL.
    async fn insert<T>(&self, value: &T) -> Result<String>
    where
        T: Serialize + Sync,
    {
        self.insert_with(value, self.default_setter()).await
    }

    /// Store `value` under a freshly generated key with an explicit TTL.
    ///
    /// Keys are UUIDv7: time-ordered and collision-resistant, so two
    /// inserts never return the same key.
    async fn insert_with<T>(&self, value: &T, opt: SetterOption) -> Result<String>
    where
        T: Serialize + Sync,
    {
        let key = Uuid::now_v7().to_string();
        self.set_with(&key, value, opt).await?;
        Ok(key)
    }
}

#[async_trait]
impl<C: Cache + ?Sized> CacheExt for C {}

/// Build the storage key for a named sequence counter.
pub(crate) fn sequence_key(name: &str) -> String {
    format!("{}{}", SEQUENCE_PREFIX, name)
}

/// Guard helper: the session of a connected handle, or `InvalidCache`.
pub(crate) fn connected<'a, S>(session: &'a Option<S>) -> Result<&'a S> {
    session.as_ref().ok_or(Error::InvalidCache)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_key_is_namespaced() {
        assert_eq!(sequence_key("orders"), "_seq_orders");
        assert_ne!(sequence_key("orders"), "orders");
    }

    #[test]
    fn test_connected_guard() {
        let open: Option<u32> = Some(7);
        let closed: Option<u32> = None;

        assert_eq!(*connected(&open).expect("open handle"), 7);
        assert!(matches!(connected(&closed), Err(Error::InvalidCache)));
    }

    #[test]
    fn test_generated_keys_are_unique_and_ordered() {
        let a = Uuid::now_v7().to_string();
        let b = Uuid::now_v7().to_string();
        assert_ne!(a, b);
        // v7 embeds a millisecond timestamp, so later keys sort later or equal
        assert!(a <= b);
    }
}
