//! Coalescing of concurrent cache misses
//!
//! The first miss for a cache key becomes the fetcher; misses for the same
//! key that arrive while the fetch is running subscribe to its outcome
//! instead of hitting the object store again.

use crate::error::Result;
use crate::key_resolver::CacheKey;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Outcome shared with waiters
pub type FetchResult = Result<Bytes>;

type PendingMap = Arc<Mutex<HashMap<CacheKey, broadcast::Sender<FetchResult>>>>;

/// Role assigned to a request after registration
pub enum FetchRole {
    /// First miss for this key; must fetch and call [`FetchGuard::complete`]
    Fetcher(FetchGuard),
    /// Another request is already fetching this key
    Waiter(broadcast::Receiver<FetchResult>),
}

/// Tracks in-flight object fetches by cache key
#[derive(Default)]
pub struct InFlightTracker {
    pending: PendingMap,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a miss for `key`, becoming either fetcher or waiter
    pub fn try_register(&self, key: &CacheKey) -> FetchRole {
        let mut pending = self.pending.lock();
        if let Some(sender) = pending.get(key) {
            return FetchRole::Waiter(sender.subscribe());
        }

        let (sender, _) = broadcast::channel(1);
        pending.insert(key.clone(), sender.clone());
        FetchRole::Fetcher(FetchGuard {
            key: key.clone(),
            sender,
            pending: Arc::clone(&self.pending),
            completed: false,
        })
    }

    /// Number of fetches currently in flight
    pub fn in_flight_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Registration of the fetching request
///
/// Dropping the guard without completing (e.g. the client disconnected and
/// the request future was cancelled) unregisters the key and closes the
/// channel, so waiters know to fetch on their own.
pub struct FetchGuard {
    key: CacheKey,
    sender: broadcast::Sender<FetchResult>,
    pending: PendingMap,
    completed: bool,
}

impl FetchGuard {
    /// Publish the fetch outcome to every waiter and unregister the key
    pub fn complete(mut self, result: &FetchResult) {
        self.pending.lock().remove(&self.key);
        self.completed = true;
        // No receivers is fine: nobody was waiting
        let _ = self.sender.send(result.clone());
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        if !self.completed {
            self.pending.lock().remove(&self.key);
        }
    }
}
