//! Policy and per-call option types.

use std::time::Duration;

/// Connection-level defaults, supplied once at connect time and immutable
/// for the lifetime of the handle.
///
/// `default_expiration` seeds the TTL used by `set`/`insert` when no
/// per-call override is given. `purge_interval` controls how often the
/// in-process backend sweeps expired entries; network backends expire
/// server-side and ignore it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PolicyOption {
    pub default_expiration: Duration,
    pub purge_interval: Duration,
}

impl PolicyOption {
    pub fn new(default_expiration: Duration, purge_interval: Duration) -> Self {
        PolicyOption {
            default_expiration,
            purge_interval,
        }
    }
}

/// Per-call TTL override for `set_with`/`insert_with`.
///
/// `no_expiration` takes precedence over `expiration`. A zero `expiration`
/// also means "never expire", the convention every backend shares, so a
/// zero `default_expiration` policy produces non-expiring entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetterOption {
    pub expiration: Duration,
    pub no_expiration: bool,
}

impl SetterOption {
    /// Expire after `expiration`.
    pub fn expires_in(expiration: Duration) -> Self {
        SetterOption {
            expiration,
            no_expiration: false,
        }
    }

    /// Never expire, regardless of the connection's default policy.
    pub fn never_expires() -> Self {
        SetterOption {
            expiration: Duration::ZERO,
            no_expiration: true,
        }
    }

    /// The per-call default derived from a connection policy.
    pub fn from_policy(policy: &PolicyOption) -> Self {
        SetterOption::expires_in(policy.default_expiration)
    }

    /// Effective TTL for the backend: `None` means the entry never expires.
    pub fn ttl(&self) -> Option<Duration> {
        if self.no_expiration || self.expiration.is_zero() {
            None
        } else {
            Some(self.expiration)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_expiration_takes_precedence() {
        let opt = SetterOption {
            expiration: Duration::from_secs(30),
            no_expiration: true,
        };
        assert_eq!(opt.ttl(), None);
    }

    #[test]
    fn test_zero_expiration_means_never() {
        assert_eq!(SetterOption::default().ttl(), None);
        assert_eq!(SetterOption::expires_in(Duration::ZERO).ttl(), None);
    }

    #[test]
    fn test_finite_ttl() {
        let opt = SetterOption::expires_in(Duration::from_secs(5));
        assert_eq!(opt.ttl(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_from_policy_uses_default_expiration() {
        let policy = PolicyOption::new(Duration::from_secs(60), Duration::from_secs(10));
        let opt = SetterOption::from_policy(&policy);
        assert_eq!(opt.ttl(), Some(Duration::from_secs(60)));
        assert!(!opt.no_expiration);
    }
}
