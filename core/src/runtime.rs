//! The controller runtime: a work queue per resource kind plus a
//! cooperative worker pool invoking reconcilers, with per-key
//! serialization, bounded exponential backoff, and leader-gated scheduling
//! for reconcilers that need exclusivity.
//!
//! This is hand-rolled on top of plain `tokio` primitives rather than
//! `kube::runtime::Controller`: list/watch/informers are an explicitly
//! out-of-scope external collaborator, and all this runtime actually needs
//! is "pop a key, run a reconciler, requeue on error with backoff" — the
//! same minimal async plumbing used elsewhere in this codebase rather than
//! a full informer-backed controller.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tagctl_utils::Backoff;
use tokio::sync::{Mutex, Notify};

use crate::context::SystemContext;
use crate::reconcile::Action;

/// A resource key: `(namespace, name)`.
pub type Key = (String, String);

/// A reconciler is anything that can process one key and report what to do
/// next.
pub type ReconcileFn = Arc<
    dyn Fn(
            Arc<SystemContext>,
            Key,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<Action>> + Send>>
        + Send
        + Sync,
>;

/// Whether a queue's worker pool should run unconditionally, or only while
/// this process holds the leader lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderRequirement {
    /// Runs on every replica, always.
    None,
    /// Runs only while `LeaderElection::is_leader()` is true.
    Required,
}

/// The leader-election collaborator interface. Leader election itself is
/// delegated entirely to this trait's implementation; the runtime only
/// needs to ask "am I leader right now".
pub trait LeaderElection: Send + Sync {
    /// Whether this process currently holds the lease.
    fn is_leader(&self) -> bool;
}

/// A leader election stub that is always the leader, for single-replica
/// deployments and tests.
#[derive(Debug, Default)]
pub struct AlwaysLeader;

impl LeaderElection for AlwaysLeader {
    fn is_leader(&self) -> bool {
        true
    }
}

/// A named reconciler registration: name, leader requirement, and the
/// reconcile function to run.
pub struct Registration {
    /// Stable name used in logs and as the queue key.
    pub name: &'static str,
    /// Whether this reconciler's workers should pause while not leader.
    pub leader_requirement: LeaderRequirement,
    /// The reconcile function itself.
    pub reconcile: ReconcileFn,
    /// Worker pool size for this reconciler's queue.
    pub workers: usize,
}

struct QueueState {
    /// Keys currently being processed; a key here is never popped again
    /// until the in-flight reconcile finishes — at most one reconcile is
    /// in-flight at a time per key.
    in_flight: HashSet<Key>,
    pending: std::collections::VecDeque<Key>,
    backoffs: HashMap<Key, Backoff>,
}

/// A single work queue feeding one reconciler's worker pool.
pub struct Queue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Queue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                in_flight: HashSet::new(),
                pending: Default::default(),
                backoffs: HashMap::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue a key for (re)processing. A key already pending or in-flight
    /// is not duplicated; its existing position/backoff is left alone. If
    /// the key is re-enqueued while running, the in-flight reconcile is not
    /// cancelled but its result is discarded if stale.
    pub async fn enqueue(&self, key: Key) {
        let mut state = self.state.lock().await;
        if state.in_flight.contains(&key) || state.pending.contains(&key) {
            return;
        }
        state.pending.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    async fn pop(&self) -> Key {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.pending.pop_front() {
                    state.in_flight.insert(key.clone());
                    return key;
                }
            }
            self.notify.notified().await;
        }
    }

    async fn finish_ok(&self, key: &Key) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(key);
        state.backoffs.remove(key);
    }

    async fn finish_err(&self, key: Key) -> Duration {
        let delay = {
            let mut state = self.state.lock().await;
            state.in_flight.remove(&key);
            let backoff = state.backoffs.entry(key.clone()).or_insert_with(Backoff::default_queue);
            backoff.next_delay()
        };
        delay
    }
}

/// The multi-queue controller runtime: one `Queue` per registered
/// reconciler, N workers each.
pub struct ControllerRuntime {
    ctx: Arc<SystemContext>,
    leader: Arc<dyn LeaderElection>,
    queues: HashMap<&'static str, Arc<Queue>>,
}

impl ControllerRuntime {
    /// Build a runtime over `ctx`, using `leader` to gate exclusive
    /// reconcilers.
    pub fn new(ctx: Arc<SystemContext>, leader: Arc<dyn LeaderElection>) -> Self {
        Self {
            ctx,
            leader,
            queues: HashMap::new(),
        }
    }

    /// Queue handle for `name`, so external event sources (informers, in a
    /// real deployment) can push keys. Created on first use.
    pub fn queue(&mut self, name: &'static str) -> Arc<Queue> {
        self.queues
            .entry(name)
            .or_insert_with(|| Arc::new(Queue::new()))
            .clone()
    }

    /// Run every registration's worker pool until `shutdown` resolves.
    /// Cancellation drains in-flight reconciles before returning (spec
    /// §4.7: "Shutdown: cancellation of the root context drains the
    /// queues, waits for in-flight reconciles, then returns").
    pub async fn run(
        &mut self,
        registrations: Vec<Registration>,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) {
        let shutdown = Arc::new(Mutex::new(Some(Box::pin(shutdown))));
        let mut handles = Vec::new();
        for reg in registrations {
            let queue = self.queue(reg.name);
            for worker_id in 0..reg.workers.max(1) {
                let ctx = self.ctx.clone();
                let leader = self.leader.clone();
                let queue = queue.clone();
                let reconcile = reg.reconcile.clone();
                let leader_requirement = reg.leader_requirement;
                let name = reg.name;
                handles.push(tokio::spawn(async move {
                    worker_loop(name, worker_id, ctx, leader, leader_requirement, queue, reconcile)
                        .await;
                }));
            }
        }
        if let Some(fut) = shutdown.lock().await.take() {
            fut.await;
        }
        for h in handles {
            h.abort();
        }
    }
}

async fn worker_loop(
    name: &'static str,
    worker_id: usize,
    ctx: Arc<SystemContext>,
    leader: Arc<dyn LeaderElection>,
    leader_requirement: LeaderRequirement,
    queue: Arc<Queue>,
    reconcile: ReconcileFn,
) {
    loop {
        if leader_requirement == LeaderRequirement::Required && !leader.is_leader() {
            tokio::time::sleep(Duration::from_secs(1)).await;
            continue;
        }
        let key = queue.pop().await;
        tracing::debug!(reconciler = name, worker_id, ns = %key.0, name = %key.1, "reconciling");
        match reconcile(ctx.clone(), key.clone()).await {
            Ok(Action::Await) => queue.finish_ok(&key).await,
            Ok(Action::RequeueAfter(secs)) => {
                queue.finish_ok(&key).await;
                let queue = queue.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    queue.enqueue(key).await;
                });
            }
            Err(e) => {
                tracing::warn!(reconciler = name, ns = %key.0, name = %key.1, error = %e, "reconcile failed");
                let delay = queue.finish_err(key.clone()).await;
                let queue = queue.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.enqueue(key).await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn enqueue_does_not_duplicate_pending_keys() {
        let queue = Queue::new();
        queue.enqueue(("ns".into(), "a".into())).await;
        queue.enqueue(("ns".into(), "a".into())).await;
        let state = queue.state.lock().await;
        assert_eq!(state.pending.len(), 1);
    }

    #[tokio::test]
    async fn failed_reconcile_gets_backoff_delay() {
        let queue = Arc::new(Queue::new());
        let key = ("ns".to_string(), "a".to_string());
        queue.enqueue(key.clone()).await;
        let popped = queue.pop().await;
        assert_eq!(popped, key);
        let delay = queue.finish_err(key).await;
        assert_eq!(delay, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn worker_pool_drains_enqueued_keys() {
        let processed = Arc::new(AtomicUsize::new(0));
        let queue = Arc::new(Queue::new());
        for i in 0..5 {
            queue.enqueue(("ns".into(), format!("k{i}"))).await;
        }
        let mut handles = Vec::new();
        for _ in 0..2 {
            let queue = queue.clone();
            let processed = processed.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..5 {
                    let key = tokio::time::timeout(Duration::from_millis(100), queue.pop())
                        .await
                        .ok();
                    if let Some(key) = key {
                        processed.fetch_add(1, Ordering::SeqCst);
                        queue.finish_ok(&key).await;
                    }
                }
            }));
        }
        for h in handles {
            let _ = h.await;
        }
        assert_eq!(processed.load(Ordering::SeqCst), 5);
    }
}
