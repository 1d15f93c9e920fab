//! Reference-counted session pool shared by all handles of one backend kind.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A backend session that can live in a [`SessionPool`].
///
/// `teardown` runs exactly once, when the last handle on the session's
/// address releases it. Implementations flush the backend and drop any
/// background work; errors are logged, not propagated, since the caller
/// releasing last gets no special treatment over the ones before it.
#[async_trait]
pub trait PoolSession: Send + Sync + 'static {
    async fn teardown(&self);
}

struct Retained<S> {
    session: Arc<S>,
    retain: usize,
}

/// Process-wide map from connection address to a reference-counted shared
/// session. One pool exists per backend kind; handles connecting to the
/// same address through the same pool transparently share one session.
///
/// All refcount and map mutation happens under the pool lock, so no two
/// handles can race one another into tearing down a live session or
/// reusing a dead one. Constructing a new session also happens under the
/// lock: concurrent first-connects to the same address serialize, the
/// winner pays the network round-trip once, and the losers find the entry
/// already populated. First-connects to *different* addresses still
/// serialize on the same lock, an accepted cost since it only affects
/// connect, never steady-state operations.
pub struct SessionPool<S> {
    sessions: Mutex<HashMap<String, Retained<S>>>,
}

impl<S> Default for SessionPool<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SessionPool<S> {
    pub fn new() -> Self {
        SessionPool {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Whether an entry exists for `address`.
    pub async fn contains(&self, address: &str) -> bool {
        self.sessions.lock().await.contains_key(address)
    }

    /// Current refcount for `address`, if an entry exists.
    pub async fn retain_count(&self, address: &str) -> Option<usize> {
        self.sessions.lock().await.get(address).map(|r| r.retain)
    }

    /// Number of distinct addresses with a live session.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

impl<S: PoolSession> SessionPool<S> {
    /// Get the shared session for `address`, creating it on first use.
    ///
    /// If an entry exists its refcount is incremented and the existing
    /// session returned; whatever `connect` would have built is ignored,
    /// so the first connector's configuration wins for all sharers.
    /// Otherwise `connect` runs (performing the backend's reachability
    /// check) and the result is stored with a refcount of 1. If `connect`
    /// fails, the error propagates and no entry is left behind.
    pub async fn acquire<F, Fut>(&self, address: &str, connect: F) -> Result<Arc<S>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<S>> + Send,
    {
        let mut sessions = self.sessions.lock().await;

        if let Some(entry) = sessions.get_mut(address) {
            entry.retain += 1;
            debug!("✓ session pool reuse {} (retain: {})", address, entry.retain);
            return Ok(entry.session.clone());
        }

        let session = Arc::new(connect().await?);
        sessions.insert(
            address.to_string(),
            Retained {
                session: session.clone(),
                retain: 1,
            },
        );
        debug!("✓ session pool create {}", address);
        Ok(session)
    }

    /// Drop one reference to the session for `address`. When the count
    /// reaches zero the entry is removed and the session torn down.
    /// Releasing an address with no entry is a no-op.
    pub async fn release(&self, address: &str) {
        let mut sessions = self.sessions.lock().await;

        let Some(entry) = sessions.get_mut(address) else {
            debug!("session pool release {} (no entry)", address);
            return;
        };

        entry.retain -= 1;
        if entry.retain > 0 {
            debug!("session pool release {} (retain: {})", address, entry.retain);
            return;
        }

        if let Some(Retained { session, .. }) = sessions.remove(address) {
            debug!("✓ session pool teardown {}", address);
            session.teardown().await;
        }
    }
}

/// Best-effort release for a handle dropped without an explicit `close`.
///
/// Spawns the release onto the current tokio runtime when one exists; its
/// timing is undefined and it must not be relied on for prompt resource
/// release. Outside a runtime the reference leaks and a warning is logged.
pub(crate) fn release_on_drop<S: PoolSession>(
    pool: &Arc<SessionPool<S>>,
    address: Option<String>,
    session: Option<Arc<S>>,
) {
    let (Some(address), Some(_session)) = (address, session) else {
        return;
    };

    warn!("cache handle for {} dropped without close", address);

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let pool = pool.clone();
            handle.spawn(async move {
                pool.release(&address).await;
            });
        }
        Err(_) => {
            warn!("no runtime available, leaking session reference for {}", address);
        }
    }
}
