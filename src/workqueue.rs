//! Generic rate-limited work queue (§4.2), modeled on the dedup/in-flight/
//! backoff semantics of client-go's `workqueue.RateLimitingInterface`, which
//! nothing in the teacher's own gRPC-shaped codebase provides directly; this
//! is a from-scratch `tokio` implementation of that well-known contract.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

const BASE_DELAY: Duration = Duration::from_millis(5);
const MAX_DELAY: Duration = Duration::from_secs(1000);

struct State<K> {
    queue: VecDeque<K>,
    queued: HashSet<K>,
    processing: HashSet<K>,
    dirty_while_processing: HashSet<K>,
    failures: std::collections::HashMap<K, u32>,
    shutting_down: bool,
}

impl<K: Eq + Hash + Clone> Default for State<K> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            queued: HashSet::new(),
            processing: HashSet::new(),
            dirty_while_processing: HashSet::new(),
            failures: std::collections::HashMap::new(),
            shutting_down: false,
        }
    }
}

/// A FIFO queue of `K` that never holds two copies of the same key and
/// never processes the same key on two workers concurrently.
///
/// - Re-adding a key already queued is a no-op (dedup-while-queued).
/// - Re-adding a key currently being processed marks it dirty; it is
///   re-queued the moment processing finishes (dirty-while-in-flight).
/// - `add_rate_limited` enforces exponential backoff per key, independent of
///   the base queue's FIFO order.
pub struct WorkQueue<K> {
    state: Mutex<State<K>>,
    notify: Notify,
}

impl<K: Eq + Hash + Clone + Send + 'static> WorkQueue<K> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(State::default()), notify: Notify::new() })
    }

    /// Enqueues `key` immediately, deduplicating against anything already
    /// queued or in flight.
    pub fn add(&self, key: K) {
        let mut state = self.state.lock();
        if state.shutting_down {
            return;
        }
        if state.processing.contains(&key) {
            state.dirty_while_processing.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            state.queue.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Blocks until a key is available or the queue has been shut down.
    /// Returns `None` once shut down and drained.
    pub async fn get(self: &Arc<Self>) -> Option<K> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Marks `key` as finished processing. If it was re-added while in
    /// flight, re-queues it now and resets its failure count on success.
    pub fn done(&self, key: K, succeeded: bool) {
        let mut state = self.state.lock();
        state.processing.remove(&key);
        if succeeded {
            state.failures.remove(&key);
        }
        if state.dirty_while_processing.remove(&key) && !state.shutting_down {
            if state.queued.insert(key.clone()) {
                state.queue.push_back(key);
                drop(state);
                self.notify.notify_one();
            }
        }
    }

    /// Schedules `key` for re-processing after an exponential backoff that
    /// grows with the key's consecutive failure count, capped at
    /// [`MAX_DELAY`]. Mirrors `done` for bookkeeping but delays the re-add.
    pub fn add_rate_limited(self: &Arc<Self>, key: K)
    where
        K: Clone,
    {
        let delay = {
            let mut state = self.state.lock();
            let count = state.failures.entry(key.clone()).or_insert(0);
            *count += 1;
            let shift = (*count - 1).min(20);
            BASE_DELAY.checked_mul(1u32 << shift).unwrap_or(MAX_DELAY).min(MAX_DELAY)
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.add(key);
        });
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cooperative shutdown: no further `get` calls will block forever, and
    /// `add` becomes a no-op. Matches client-go's `ShutDown`.
    pub fn shut_down(&self) {
        let mut state = self.state.lock();
        state.shutting_down = true;
        drop(state);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn get_returns_keys_in_fifo_order() {
        let q: Arc<WorkQueue<&'static str>> = WorkQueue::new();
        q.add("a");
        q.add("b");
        q.add("c");
        assert_eq!(q.get().await.unwrap(), "a");
        assert_eq!(q.get().await.unwrap(), "b");
        assert_eq!(q.get().await.unwrap(), "c");
    }

    #[tokio::test]
    async fn dedups_while_queued() {
        let q: Arc<WorkQueue<&'static str>> = WorkQueue::new();
        q.add("a");
        q.add("a");
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn requeues_dirty_key_added_during_processing() {
        let q: Arc<WorkQueue<&'static str>> = WorkQueue::new();
        q.add("a");
        let got = q.get().await.unwrap();
        assert_eq!(got, "a");
        // Re-added while in flight: must not be lost.
        q.add("a");
        assert_eq!(q.len(), 0);
        q.done("a", true);
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn get_returns_none_after_shutdown_and_drain() {
        let q: Arc<WorkQueue<&'static str>> = WorkQueue::new();
        q.shut_down();
        assert!(q.get().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_add_backs_off_exponentially() {
        let q: Arc<WorkQueue<&'static str>> = WorkQueue::new();
        q.add_rate_limited("a");
        tokio::time::advance(StdDuration::from_millis(4)).await;
        assert_eq!(q.len(), 0, "should not be visible before base delay elapses");
        tokio::time::advance(StdDuration::from_millis(2)).await;
        assert_eq!(q.len(), 1);
        q.get().await;
        q.add_rate_limited("a");
        tokio::time::advance(StdDuration::from_millis(9)).await;
        assert_eq!(q.len(), 0, "second failure should wait roughly 2x as long");
        tokio::time::advance(StdDuration::from_millis(2)).await;
        assert_eq!(q.len(), 1);
    }
}
