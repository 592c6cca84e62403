use crate::error::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Window used when an entry is inserted without an explicit expiry.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Runs once when an entry expires.
pub type ExpiryCallback = Box<dyn FnOnce() -> Result<()> + Send>;

struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
    on_expire: ExpiryCallback,
    timer: AbortHandle,
    generation: u64,
}

struct Inner<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    next_generation: AtomicU64,
    default_window: Duration,
}

/// Time-bounded registry holding at most one live value per key.
///
/// Every entry owns a timer task. Bumping the expiry aborts that task and schedules a
/// new one; the expiry callback moves along unchanged and runs exactly once.
pub struct ListenerCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for ListenerCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Default for ListenerCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl<V> ListenerCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(default_window: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                key_locks: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                default_window,
            }),
        }
    }

    /// Inserts `value` under `key`, expiring at `expiry` or after the default window.
    ///
    /// An entry already stored under `key` is superseded: its timer is cancelled and its
    /// callback runs immediately, so whatever it guarded is torn down exactly once.
    pub async fn put(
        &self,
        key: &str,
        value: V,
        on_expire: ExpiryCallback,
        expiry: Option<DateTime<Utc>>,
    ) {
        // A window too large to represent never expires.
        let expires_at = expiry.unwrap_or_else(|| {
            chrono::Duration::from_std(self.inner.default_window)
                .ok()
                .and_then(|window| Utc::now().checked_add_signed(window))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        });

        debug!(key, %expires_at, "adding to cache");
        let superseded = {
            let mut entries = self.inner.entries.lock().await;
            // Scheduled under the lock so the timer cannot observe the map before insertion.
            let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
            let timer = self.schedule(key, expires_at, generation);
            entries.insert(
                key.to_string(),
                Entry {
                    value,
                    expires_at,
                    on_expire,
                    timer,
                    generation,
                },
            )
        };

        if let Some(old) = superseded {
            old.timer.abort();
            run_callback(key, old.on_expire);
        }
    }

    /// Returns the value stored under `key`.
    ///
    /// When `expiry` is later than the stored expiry, the entry's lifetime is extended
    /// to it. An earlier or equal expiry leaves the entry untouched.
    pub async fn get(&self, key: &str, expiry: Option<DateTime<Utc>>) -> Option<V> {
        let mut entries = self.inner.entries.lock().await;
        let entry = entries.get_mut(key)?;

        if let Some(expiry) = expiry
            && expiry > entry.expires_at
        {
            debug!(key, %expiry, "bumping expiry");
            entry.timer.abort();
            let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
            entry.timer = self.schedule(key, expiry, generation);
            entry.generation = generation;
            entry.expires_at = expiry;
        }

        Some(entry.value.clone())
    }

    /// Looks `key` up (bumping its expiry as [`get`](Self::get) does) and, on a miss,
    /// builds the value with `init` and stores it.
    ///
    /// Calls for the same key are serialized, so `init` runs at most once per live entry
    /// even under concurrent callers. Calls for different keys do not block each other.
    pub async fn get_or_try_insert_with<F, Fut, E>(
        &self,
        key: &str,
        expiry: DateTime<Utc>,
        init: F,
    ) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<(V, ExpiryCallback), E>>,
    {
        let key_lock = {
            let mut locks = self.inner.key_locks.lock().await;
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        let guard = key_lock.lock().await;

        if let Some(value) = self.get(key, Some(expiry)).await {
            return Ok(value);
        }

        let (value, on_expire) = match init().await {
            Ok(built) => built,
            Err(e) => {
                drop(guard);
                self.release_key_lock(key, key_lock).await;
                return Err(e);
            }
        };
        self.put(key, value.clone(), on_expire, Some(expiry)).await;
        Ok(value)
    }

    /// Drops the lock for a key that got no entry, unless another caller is waiting on it.
    async fn release_key_lock(&self, key: &str, key_lock: Arc<Mutex<()>>) {
        let mut locks = self.inner.key_locks.lock().await;
        // Held by the map and by `key_lock` only.
        if locks
            .get(key)
            .is_some_and(|lock| Arc::ptr_eq(lock, &key_lock) && Arc::strong_count(lock) == 2)
        {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    async fn key_lock_count(&self) -> usize {
        self.inner.key_locks.lock().await.len()
    }

    pub async fn expires_at(&self, key: &str) -> Option<DateTime<Utc>> {
        let entries = self.inner.entries.lock().await;
        entries.get(key).map(|entry| entry.expires_at)
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.entries.lock().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.inner.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn schedule(&self, key: &str, expires_at: DateTime<Utc>, generation: u64) -> AbortHandle {
        let delay = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.expire(&key, generation).await;
        })
        .abort_handle()
    }
}

impl<V> Inner<V> {
    async fn expire(&self, key: &str, generation: u64) {
        let expired = {
            let mut entries = self.entries.lock().await;
            match entries.get(key) {
                Some(entry) if entry.generation == generation => entries.remove(key),
                _ => None,
            }
        };

        let Some(entry) = expired else {
            return;
        };

        debug!(key, "cache entry expired");
        run_callback(key, entry.on_expire);

        let mut locks = self.key_locks.lock().await;
        if locks
            .get(key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(key);
        }
    }
}

fn run_callback(key: &str, callback: ExpiryCallback) {
    if let Err(e) = callback() {
        warn!(key, error = %e, "error on cache expiry callback");
    }
}
