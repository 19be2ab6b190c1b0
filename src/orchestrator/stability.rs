//! Bounded wait for a session's message log to stop growing.
//!
//! The host flushes messages asynchronously, so a turn-ended event can arrive
//! before the log is complete. The count is polled until it has been steady
//! for `window`, and the wait gives up after `max_wait` regardless.

use std::time::Duration;

use brain_common::MessageStore;
use rand::Rng;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilitySettings {
    pub window: Duration,
    /// Hard ceiling on the whole wait.
    pub max_wait: Duration,
    pub poll: Duration,
    /// Random extra delay added to each poll, up to this much.
    pub jitter: Duration,
}

impl Default for StabilitySettings {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(1500),
            max_wait: Duration::from_secs(10),
            poll: Duration::from_millis(300),
            jitter: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    Stable { count: usize },
    /// Ceiling reached; proceed with what was observed.
    TimedOut { count: usize },
}

impl Stability {
    pub fn count(&self) -> usize {
        match self {
            Self::Stable { count } | Self::TimedOut { count } => *count,
        }
    }
}

fn poll_delay(settings: &StabilitySettings) -> Duration {
    let jitter_ms = settings.jitter.as_millis() as u64;
    if jitter_ms == 0 {
        return settings.poll;
    }
    settings.poll + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
}

async fn read_count(store: &dyn MessageStore, session_id: &str) -> Option<usize> {
    match store.get_message_count(session_id).await {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::warn!(session_id, error = %e, "Failed to read message count");
            None
        }
    }
}

/// Wait until the message count of `session_id` stops changing.
pub async fn wait_for_stable_count(
    store: &dyn MessageStore,
    session_id: &str,
    settings: &StabilitySettings,
) -> Stability {
    let started = Instant::now();
    let mut last = read_count(store, session_id).await;
    let mut steady_since = Instant::now();

    loop {
        if last.is_some() && steady_since.elapsed() >= settings.window {
            return Stability::Stable {
                count: last.unwrap_or(0),
            };
        }
        let elapsed = started.elapsed();
        if elapsed >= settings.max_wait {
            let count = last.unwrap_or(0);
            tracing::warn!(
                session_id,
                count,
                waited_ms = elapsed.as_millis() as u64,
                "Message store did not settle, proceeding"
            );
            return Stability::TimedOut { count };
        }

        let delay = poll_delay(settings).min(settings.max_wait - elapsed);
        tokio::time::sleep(delay).await;

        let current = read_count(store, session_id).await;
        if current != last {
            last = current;
            steady_since = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brain_common::InMemoryMessageStore;
    use serde_json::json;
    use std::sync::Arc;

    fn fast() -> StabilitySettings {
        StabilitySettings {
            window: Duration::from_millis(30),
            max_wait: Duration::from_millis(500),
            poll: Duration::from_millis(5),
            jitter: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_quiet_log_is_stable() {
        let store = InMemoryMessageStore::new();
        store.push("s", json!({"role": "user"})).unwrap();
        let outcome = wait_for_stable_count(&store, "s", &fast()).await;
        assert_eq!(outcome, Stability::Stable { count: 1 });
    }

    #[tokio::test]
    async fn test_waits_for_writer_to_finish() {
        let store = Arc::new(InMemoryMessageStore::new());
        let writer = store.clone();
        let task = tokio::spawn(async move {
            for _ in 0..5 {
                writer.push("s", json!({"role": "agent"})).unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let outcome = wait_for_stable_count(store.as_ref(), "s", &fast()).await;
        task.await.unwrap();
        assert_eq!(outcome.count(), 5);
        assert!(matches!(outcome, Stability::Stable { .. }));
    }

    #[tokio::test]
    async fn test_ceiling_bounds_the_wait() {
        let store = Arc::new(InMemoryMessageStore::new());
        let writer = store.clone();
        let task = tokio::spawn(async move {
            for _ in 0..100 {
                writer.push("s", json!({"role": "agent"})).unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let settings = StabilitySettings {
            window: Duration::from_millis(200),
            max_wait: Duration::from_millis(100),
            poll: Duration::from_millis(5),
            jitter: Duration::ZERO,
        };
        let started = std::time::Instant::now();
        let outcome = wait_for_stable_count(store.as_ref(), "s", &settings).await;
        assert!(matches!(outcome, Stability::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_millis(400));
        task.abort();
    }
}
