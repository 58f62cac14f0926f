//! Per-device status cache with request coalescing
//!
//! A status younger than the TTL is served from memory. Otherwise callers
//! join the fetch already in flight for that device, or start one. The
//! in-flight handle is cleared when the fetch completes, success or not.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::error::{Error, Result};
use crate::models::DeviceStatus;

pub const DEFAULT_TTL: Duration = Duration::from_secs(2);

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<DeviceStatus>>>>;

struct PendingFetch {
    id: u64,
    fetch: SharedFetch,
}

#[derive(Default)]
struct CacheEntry {
    data: Option<(Arc<DeviceStatus>, Instant)>,
    pending: Option<PendingFetch>,
}

type Entries = Arc<Mutex<HashMap<String, CacheEntry>>>;

pub struct StatusCache {
    ttl: Duration,
    /// Serve the last known status when a refetch fails.
    stale_on_error: bool,
    entries: Entries,
    next_fetch_id: AtomicU64,
}

impl StatusCache {
    pub fn new(ttl: Duration, stale_on_error: bool) -> Self {
        Self {
            ttl,
            stale_on_error,
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_fetch_id: AtomicU64::new(0),
        }
    }

    /// Cached status for `device_id`, or the result of the in-flight fetch,
    /// or the result of a new fetch built by `fetch`.
    pub async fn get_or_fetch<F, Fut>(&self, device_id: &str, fetch: F) -> Result<Arc<DeviceStatus>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DeviceStatus>> + Send + 'static,
    {
        let shared = {
            let mut entries = lock(&self.entries);
            let entry = entries.entry(device_id.to_string()).or_default();

            if let Some((status, stored_at)) = &entry.data {
                if stored_at.elapsed() < self.ttl {
                    return Ok(Arc::clone(status));
                }
            }

            match &entry.pending {
                Some(pending) => {
                    tracing::debug!("Joining in-flight status fetch for {}", device_id);
                    pending.fetch.clone()
                }
                None => {
                    let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
                    let fetch = track(
                        Arc::clone(&self.entries),
                        device_id.to_string(),
                        id,
                        fetch(),
                    )
                    .boxed()
                    .shared();
                    entry.pending = Some(PendingFetch {
                        id,
                        fetch: fetch.clone(),
                    });
                    fetch
                }
            }
        };

        match shared.await {
            Ok(status) => Ok(status),
            Err(e) => {
                if self.stale_on_error {
                    if let Some(status) = self.last_known(device_id) {
                        tracing::warn!(
                            "Status fetch for {} failed ({}); serving last known status",
                            device_id,
                            e
                        );
                        return Ok(status);
                    }
                }
                Err(Error::StatusFetchFailed {
                    device_id: device_id.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    /// Drop the cached status and any in-flight fetch for `device_id`. A fetch
    /// that was in flight still completes for its waiters but is not stored.
    pub fn invalidate(&self, device_id: &str) {
        if lock(&self.entries).remove(device_id).is_some() {
            tracing::debug!("Status cache invalidated for {}", device_id);
        }
    }

    fn last_known(&self, device_id: &str) -> Option<Arc<DeviceStatus>> {
        lock(&self.entries)
            .get(device_id)
            .and_then(|entry| entry.data.as_ref())
            .map(|(status, _)| Arc::clone(status))
    }
}

/// Runs the fetch, then stores the result and clears the pending handle,
/// unless the entry was invalidated or replaced meanwhile.
async fn track<Fut>(
    entries: Entries,
    device_id: String,
    fetch_id: u64,
    fetch: Fut,
) -> Result<Arc<DeviceStatus>>
where
    Fut: Future<Output = Result<DeviceStatus>>,
{
    let result = fetch.await.map(Arc::new);

    let mut entries = lock(&entries);
    if let Some(entry) = entries.get_mut(&device_id) {
        if entry.pending.as_ref().map(|p| p.id) == Some(fetch_id) {
            entry.pending = None;
            if let Ok(status) = &result {
                entry.data = Some((Arc::clone(status), Instant::now()));
            }
        }
    }

    result
}

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    entries.lock().unwrap_or_else(|e| e.into_inner())
}
