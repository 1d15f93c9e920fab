//! # cache-hub
//!
//! A pluggable key/value caching abstraction: one contract for get, set
//! with TTL, existence checks, atomic sequences, delete, and truncate,
//! implemented by interchangeable backend drivers selected by name at
//! runtime.
//!
//! ## Features
//!
//! - **Backend Agnostic:** in-memory, Redis, and Memcached drivers behind
//!   one trait, with the same error taxonomy everywhere
//! - **Shared Sessions:** handles connecting to the same address share one
//!   reference-counted backend session, torn down when the last user closes
//! - **Explicit Wiring:** registries and pools are plain values you
//!   construct: one per process, or one per test for isolation
//! - **Type Safe:** typed get/set over serde, with cache misses kept
//!   distinct from deserialization failures and transport outages
//!
//! ## Quick Start
//!
//! ```ignore
//! use cache_hub::{CacheExt, DriverRegistry, PolicyOption, SetterOption};
//! use std::time::Duration;
//!
//! let registry = DriverRegistry::with_builtin_drivers();
//!
//! let mut cache = registry.resolve("memory")?;
//! cache.connect("localhost", PolicyOption {
//!     default_expiration: Duration::from_secs(60),
//!     purge_interval: Duration::from_secs(60),
//! }).await?;
//!
//! cache.set("user:1", &user).await?;
//! let back: User = cache.get("user:1").await?;
//!
//! let order_no = cache.next_sequence("orders").await?;
//! let key = cache.insert_with(&event, SetterOption::never_expires()).await?;
//!
//! cache.close().await?;
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod cache;
pub mod error;
pub mod options;
pub mod pool;
pub mod registry;

// Re-exports for convenience
pub use cache::{Cache, CacheExt, SEQUENCE_PREFIX};
pub use error::{Error, Result};
pub use options::{PolicyOption, SetterOption};
pub use pool::{PoolSession, SessionPool};
pub use registry::{DriverFactory, DriverRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
