//! Per-key debounce timers.
//!
//! Scheduling a key replaces its pending timer, so only the latest event in a
//! burst fires. A timer removes its own entry when it fires; the generation
//! check keeps a late timer from removing its replacement.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct Debouncer {
    timers: Arc<Mutex<HashMap<String, PendingTimer>>>,
    next_generation: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay` unless `key` is scheduled again first.
    pub fn schedule<F, Fut>(&self, key: &str, delay: Duration, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let timers = self.timers.clone();
        let owned_key = key.to_string();

        // Holding the lock across spawn+insert keeps the fired task from
        // looking for its entry before it exists.
        let mut map = lock(&self.timers);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut map = lock(&timers);
                if map
                    .get(&owned_key)
                    .is_some_and(|t| t.generation == generation)
                {
                    map.remove(&owned_key);
                }
            }
            task().await;
        });
        if let Some(previous) = map.insert(key.to_string(), PendingTimer { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Drop the pending timer for `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &str) -> bool {
        match lock(&self.timers).remove(key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, timer) in lock(&self.timers).drain() {
            timer.handle.abort();
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        lock(&self.timers).contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.timers).len()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_only_latest_event_fires() {
        let debouncer = Debouncer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(Mutex::new(0));

        for i in 1..=5 {
            let fired = fired.clone();
            let last = last.clone();
            debouncer.schedule("main-1", Duration::from_millis(40), move || async move {
                fired.fetch_add(1, Ordering::SeqCst);
                *last.lock().unwrap() = i;
            });
        }
        assert!(debouncer.is_pending("main-1"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(*last.lock().unwrap(), 5);
        assert!(!debouncer.is_pending("main-1"));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let debouncer = Debouncer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        for key in ["a", "b"] {
            let fired = fired.clone();
            debouncer.schedule(key, Duration::from_millis(20), move || async move {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(debouncer.pending_count(), 2);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let debouncer = Debouncer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        debouncer.schedule("main-1", Duration::from_millis(20), move || async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(debouncer.cancel("main-1"));
        assert!(!debouncer.cancel("main-1"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reschedule_from_inside_fired_task() {
        let debouncer = Arc::new(Debouncer::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let d = debouncer.clone();
        let f = fired.clone();
        debouncer.schedule("k", Duration::from_millis(10), move || async move {
            f.fetch_add(1, Ordering::SeqCst);
            let f2 = f.clone();
            d.schedule("k", Duration::from_millis(10), move || async move {
                f2.fetch_add(1, Ordering::SeqCst);
            });
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(debouncer.pending_count(), 0);
    }
}
