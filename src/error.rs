//! Error taxonomy shared by every cache driver.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error set every driver returns, regardless of backend.
///
/// Drivers must map backend-native conditions onto these variants (a
/// backend's "key not found" becomes [`Error::NotExist`], a rejected
/// address becomes [`Error::InvalidHost`], and so on). Failures outside
/// the taxonomy (transport errors, malformed stored bytes) pass through
/// as [`Error::Backend`] and [`Error::Serialization`] so callers can still
/// tell a cache miss from a real outage.
#[derive(Debug, Error)]
pub enum Error {
    /// The key is not present in the cache.
    #[error("not exist")]
    NotExist,

    /// The address is not accepted by this driver.
    #[error("invalid host")]
    InvalidHost,

    /// The address could not be parsed into a backend connection.
    #[error("invalid connection string")]
    InvalidConnectionString,

    /// An argument was rejected before reaching the backend.
    #[error("invalid argument")]
    InvalidArgument,

    /// The backend refused the operation.
    #[error("not permitted")]
    NotPermitted,

    /// No driver is registered under the requested name.
    #[error("not supported driver")]
    NotSupportedDriver,

    /// The driver does not implement this operation.
    #[error("not supported method")]
    NotSupportedMethod,

    /// The handle is not connected; only `connect` is valid.
    #[error("invalid cache")]
    InvalidCache,

    /// Value serialization or deserialization failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend client or transport failure, passed through unwrapped.
    #[error("backend error: {0}")]
    Backend(String),
}

impl Error {
    /// Build a [`Error::Backend`] from any displayable client error.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Error::Backend(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Backend(err.to_string())
    }
}
