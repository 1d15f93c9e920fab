//! Backend drivers: one module per cache technology, each implementing
//! the full [`Cache`](crate::Cache) contract over its own session pool.

#[cfg(feature = "memcached")]
pub mod memcached;
#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "memcached")]
pub use memcached::{MemcachedCache, MemcachedDriver, MemcachedSession};
#[cfg(feature = "memory")]
pub use memory::{MemoryCache, MemoryDriver, MemorySession};
#[cfg(feature = "redis")]
pub use redis::{RedisCache, RedisDriver, RedisSession};

use crate::registry::DriverRegistry;

/// Register every compiled-in driver under its canonical name. Order
/// carries no meaning; each driver owns a fresh session pool.
pub fn register_builtin(registry: &DriverRegistry) {
    #[cfg(feature = "memory")]
    MemoryDriver::new().register(registry);
    #[cfg(feature = "redis")]
    RedisDriver::new().register(registry);
    #[cfg(feature = "memcached")]
    MemcachedDriver::new().register(registry);
}
