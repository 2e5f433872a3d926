//! ControllerManager (§4.3): owns one `WorkQueue` per resource kind, fans
//! keys out to a worker pool per kind, and coordinates graceful shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::metadata::ResourceKey;
use crate::model::Kind;
use crate::reconcile::{Outcome, Reconciler};
use crate::workqueue::WorkQueue;

struct Registration {
    reconciler: Arc<dyn Reconciler>,
    queue: Arc<WorkQueue<ResourceKey>>,
}

pub struct ControllerManager {
    registry: HashMap<Kind, Registration>,
    workers_per_kind: usize,
    handles: tokio::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ControllerManager {
    pub fn new(workers_per_kind: usize) -> Self {
        Self { registry: HashMap::new(), workers_per_kind, handles: tokio::sync::Mutex::new(Vec::new()) }
    }

    /// Registers a reconciler and returns the queue so callers (RPC
    /// handlers, the HealthController) can enqueue keys for this kind.
    pub fn register(&mut self, kind: Kind, reconciler: Arc<dyn Reconciler>) -> Arc<WorkQueue<ResourceKey>> {
        let queue = WorkQueue::new();
        self.register_with_queue(kind, reconciler, queue.clone());
        queue
    }

    /// Like [`Self::register`], but binds the reconciler to a queue the
    /// caller already created — needed when a reconciler also holds that
    /// same `Arc<WorkQueue>` directly (e.g. to requeue itself after a
    /// delay, or because a sibling reconciler enqueues into it across
    /// kinds) and must observe the exact instance the dispatch loop drains.
    pub fn register_with_queue(&mut self, kind: Kind, reconciler: Arc<dyn Reconciler>, queue: Arc<WorkQueue<ResourceKey>>) {
        self.registry.insert(kind, Registration { reconciler, queue });
    }

    pub fn enqueue(&self, kind: Kind, key: ResourceKey) {
        if let Some(reg) = self.registry.get(&kind) {
            reg.queue.add(key);
        }
    }

    /// Spawns `workers_per_kind` reconcile loops per registered kind.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        for (kind, reg) in &self.registry {
            for worker in 0..self.workers_per_kind {
                let queue = Arc::clone(&reg.queue);
                let reconciler = Arc::clone(&reg.reconciler);
                let kind = *kind;
                handles.push(tokio::spawn(async move {
                    tracing::info!(%kind, worker, "reconciler worker started");
                    while let Some(key) = queue.get().await {
                        let outcome = reconciler.reconcile(&key).await;
                        match outcome {
                            Outcome::Success => queue.done(key, true),
                            Outcome::Retry(reason) => {
                                tracing::warn!(%kind, %key, %reason, "reconcile will retry");
                                queue.done(key.clone(), false);
                                queue.add_rate_limited(key);
                            }
                            Outcome::Fatal(reason) => {
                                tracing::error!(%kind, %key, %reason, "reconcile failed fatally");
                                queue.done(key, true);
                            }
                        }
                    }
                    tracing::info!(%kind, worker, "reconciler worker stopped");
                }));
            }
        }
    }

    /// Shuts down every queue, then waits up to `timeout` for all workers to
    /// return. Returns `true` iff every worker exited within the deadline —
    /// callers must not call `Store::close` otherwise (§8 property 7).
    pub async fn stop(&self, timeout: Duration) -> bool {
        for reg in self.registry.values() {
            reg.queue.shut_down();
        }
        let mut handles = self.handles.lock().await;
        let joined = tokio::time::timeout(timeout, async {
            for handle in handles.drain(..) {
                let _ = handle.await;
            }
        })
        .await;
        joined.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReconciler(Arc<AtomicUsize>);

    #[async_trait]
    impl Reconciler for CountingReconciler {
        async fn reconcile(&self, _key: &ResourceKey) -> Outcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            Outcome::Success
        }
    }

    #[tokio::test]
    async fn enqueue_drives_the_registered_reconciler() {
        let mut manager = ControllerManager::new(1);
        let count = Arc::new(AtomicUsize::new(0));
        manager.register(Kind::Devnet, Arc::new(CountingReconciler(count.clone())));
        manager.start().await;
        manager.enqueue(Kind::Devnet, ResourceKey::new("default", "dev-1"));

        for _ in 0..50 {
            if count.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(manager.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn stop_returns_true_when_workers_exit_in_time() {
        let manager = ControllerManager::new(1);
        manager.start().await;
        assert!(manager.stop(Duration::from_secs(1)).await);
    }
}
