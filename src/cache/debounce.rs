//! Trailing-edge write debouncing for the persisted tier.
//!
//! Each key owns at most one pending timer. Scheduling a new value for a key
//! aborts the previous timer; only the latest value is written once the key
//! has been quiet for the full delay.

use crate::cache::store::KvStore;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_DELAY: Duration = Duration::from_secs(2);

struct PendingWrite {
    value: String,
    generation: u64,
    handle: JoinHandle<()>,
}

struct DebounceInner {
    store: Arc<dyn KvStore>,
    delay: Duration,
    pending: Mutex<HashMap<String, PendingWrite>>,
    generation: AtomicU64,
}

impl DebounceInner {
    fn pending(&self) -> MutexGuard<'_, HashMap<String, PendingWrite>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write the value if the timer that fired is still the current one for the key.
    async fn fire(&self, key: &str, generation: u64) {
        let value = {
            let mut pending = self.pending();
            match pending.get(key) {
                Some(write) if write.generation == generation => pending.remove(key).map(|w| w.value),
                _ => None,
            }
        };
        if let Some(value) = value {
            debug!("debounced write of {key} ({} bytes)", value.len());
            if let Err(e) = self.store.set(key, &value).await {
                warn!("debounced write of {key} failed: {e}");
            }
        }
    }
}

impl Drop for DebounceInner {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, write) in pending.drain() {
            write.handle.abort();
        }
    }
}

/// Cheap to clone; clones share timers. Dropping the last clone aborts every
/// pending write, so call [`Debouncer::flush`] on shutdown.
#[derive(Clone)]
pub struct Debouncer {
    inner: Arc<DebounceInner>,
}

impl Debouncer {
    pub fn new(store: Arc<dyn KvStore>, delay: Duration) -> Self {
        Self {
            inner: Arc::new(DebounceInner {
                store,
                delay,
                pending: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, key: impl Into<String>, value: String) {
        let key = key.into();
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let weak: Weak<DebounceInner> = Arc::downgrade(&self.inner);
        let delay = self.inner.delay;
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire(&task_key, generation).await;
            }
        });

        let previous = self
            .inner
            .pending()
            .insert(key, PendingWrite { value, generation, handle });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }

    /// Drop a pending write without performing it.
    pub fn cancel(&self, key: &str) -> bool {
        match self.inner.pending().remove(key) {
            Some(write) => {
                write.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_prefix(&self, prefix: &str) -> usize {
        let mut pending = self.inner.pending();
        let keys: Vec<String> = pending.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        for key in &keys {
            if let Some(write) = pending.remove(key) {
                write.handle.abort();
            }
        }
        keys.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }

    /// Write every pending value now.
    pub async fn flush(&self) -> usize {
        let drained: Vec<(String, String)> = {
            let mut pending = self.inner.pending();
            pending
                .drain()
                .map(|(key, write)| {
                    write.handle.abort();
                    (key, write.value)
                })
                .collect()
        };
        let count = drained.len();
        for (key, value) in drained {
            if let Err(e) = self.inner.store.set(&key, &value).await {
                warn!("flush of {key} failed: {e}");
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;

    fn debouncer() -> (Arc<MemoryStore>, Debouncer) {
        let store = Arc::new(MemoryStore::new());
        let debouncer = Debouncer::new(store.clone(), DEFAULT_DELAY);
        (store, debouncer)
    }

    #[tokio::test(start_paused = true)]
    async fn only_latest_value_is_written_after_quiet_period() {
        let (store, debouncer) = debouncer();
        debouncer.schedule("k", "v1".into());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        debouncer.schedule("k", "v2".into());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.get("k").await.unwrap(), None);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_writes_immediately_and_cancels_timers() {
        let (store, debouncer) = debouncer();
        debouncer.schedule("a", "1".into());
        debouncer.schedule("b", "2".into());
        assert_eq!(debouncer.flush().await, 2);
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        store.remove("a").await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_drop_discard_pending_writes() {
        let (store, debouncer) = debouncer();
        debouncer.schedule("previewFenCache:t:1", "x".into());
        debouncer.schedule("previewFenCache:t:2", "y".into());
        debouncer.schedule("other", "z".into());
        assert_eq!(debouncer.cancel_prefix("previewFenCache:t:"), 2);
        assert!(debouncer.cancel("other"));
        assert!(!debouncer.cancel("other"));

        debouncer.schedule("late", "w".into());
        drop(debouncer);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(store.keys_with_prefix("").await.unwrap().is_empty());
    }
}
