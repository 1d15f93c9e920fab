//! Driver registry: name → factory mapping and driver resolution.

use crate::cache::Cache;
use crate::error::{Error, Result};
use dashmap::DashMap;

/// Factory producing a fresh, unconnected driver instance.
pub type DriverFactory = Box<dyn Fn() -> Box<dyn Cache> + Send + Sync>;

/// Mapping from backend name to an adapter factory.
///
/// Callers construct one registry per process (or per test, for
/// isolation), register the drivers they compile in, and resolve handles
/// by name. Resolution is the crate's facade: the only coupling between a
/// caller and a concrete backend is the registered name.
///
/// Two resolved handles never share mutable state directly; sharing
/// happens only through the driver's session pool, which each factory
/// captures and threads into every instance it produces.
///
/// ```ignore
/// let registry = DriverRegistry::with_builtin_drivers();
/// let mut cache = registry.resolve("memory")?;
/// cache.connect("localhost", PolicyOption::default()).await?;
/// ```
#[derive(Default)]
pub struct DriverRegistry {
    drivers: DashMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// An empty registry with no drivers.
    pub fn new() -> Self {
        DriverRegistry {
            drivers: DashMap::new(),
        }
    }

    /// A registry preloaded with every backend enabled at compile time,
    /// each under its canonical name (`"memory"`, `"redis"`,
    /// `"memcached"`).
    pub fn with_builtin_drivers() -> Self {
        let registry = Self::new();
        crate::backend::register_builtin(&registry);
        registry
    }

    /// Register `factory` under `name`. Registration order carries no
    /// meaning and the last writer for a name wins, so independent driver
    /// modules can register at startup without coordination.
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Cache> + Send + Sync + 'static,
    {
        debug!("✓ driver registered: {}", name);
        self.drivers.insert(name.to_string(), Box::new(factory));
    }

    /// Produce a fresh, unconnected handle for the named driver.
    ///
    /// # Errors
    ///
    /// `Error::NotSupportedDriver` if nothing is registered under `name`;
    /// surfaced here, at resolution time, never deferred to first use.
    pub fn resolve(&self, name: &str) -> Result<Box<dyn Cache>> {
        match self.drivers.get(name) {
            Some(factory) => Ok(factory()),
            None => {
                warn!("✗ unknown driver requested: {}", name);
                Err(Error::NotSupportedDriver)
            }
        }
    }

    /// Names currently registered, in no particular order.
    pub fn driver_names(&self) -> Vec<String> {
        self.drivers.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheExt;
    use crate::options::PolicyOption;

    #[test]
    fn test_resolve_unknown_driver() {
        let registry = DriverRegistry::new();
        let result = registry.resolve("no-such-driver");
        assert!(matches!(result, Err(Error::NotSupportedDriver)));
    }

    #[cfg(feature = "memory")]
    #[test]
    fn test_builtin_drivers_registered() {
        let registry = DriverRegistry::with_builtin_drivers();
        assert!(registry.driver_names().contains(&"memory".to_string()));
        assert!(registry.resolve("memory").is_ok());
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_resolutions_are_independent_instances() {
        let registry = DriverRegistry::with_builtin_drivers();

        let mut first = registry.resolve("memory").expect("resolve failed");
        let second = registry.resolve("memory").expect("resolve failed");

        // connecting one must not affect the other
        first
            .connect("localhost", PolicyOption::default())
            .await
            .expect("connect failed");
        first.set("k", &1u32).await.expect("set failed");

        let err = second.get::<u32>("k").await.expect_err("unconnected handle");
        assert!(matches!(err, Error::InvalidCache));
    }

    #[cfg(feature = "memory")]
    #[test]
    fn test_last_registration_wins() {
        use crate::backend::memory::MemoryDriver;

        let registry = DriverRegistry::new();
        let driver = MemoryDriver::new();
        let replacement = MemoryDriver::new();

        registry.register("cache", move || driver.new_cache());
        registry.register("cache", move || replacement.new_cache());

        assert_eq!(registry.driver_names(), vec!["cache".to_string()]);
        assert!(registry.resolve("cache").is_ok());
    }
}
