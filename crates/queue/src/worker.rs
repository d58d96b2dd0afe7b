//! Worker pool draining a [`WorkQueue`] into a [`Reconciler`].

use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tandem_core::{SyncError, SyncResult};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::WorkQueue;

#[async_trait::async_trait]
pub trait Reconciler<K>: Send + Sync {
    fn name(&self) -> &'static str;
    async fn reconcile(&self, key: &K) -> SyncResult<()>;
}

/// Take one key, reconcile it and settle its queue state.
/// Returns `false` once the queue is shut down.
pub async fn process_next_work_item<K, R>(queue: &Arc<WorkQueue<K>>, reconciler: &R) -> bool
where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
    R: Reconciler<K> + ?Sized,
{
    let Some(key) = queue.get().await else {
        return false;
    };
    let started = Instant::now();
    let result = reconciler.reconcile(&key).await;
    histogram!("reconcile_ms", started.elapsed().as_secs_f64() * 1000.0, "controller" => reconciler.name());
    match result {
        Ok(()) => queue.forget(&key),
        Err(err) if err.is_retryable() => {
            counter!("reconcile_errors_total", 1u64, "controller" => reconciler.name(), "retry" => "true");
            debug!(controller = reconciler.name(), key = %key, requeues = queue.num_requeues(&key), error = %err, "reconcile failed; requeueing");
            queue.add_rate_limited(key.clone());
        }
        Err(err) => {
            counter!("reconcile_errors_total", 1u64, "controller" => reconciler.name(), "retry" => "false");
            report_dropped(reconciler.name(), &key, &err);
            queue.forget(&key);
        }
    }
    queue.done(&key);
    true
}

fn report_dropped(controller: &str, key: &dyn Display, err: &SyncError) {
    warn!(controller, key = %key, error = %err, "reconcile failed permanently; dropping key");
}

/// Run `workers` concurrent loops until `cancel` fires, then shut the queue down
/// and wait for in-flight reconciles to finish.
pub async fn run_workers<K, R>(queue: Arc<WorkQueue<K>>, reconciler: Arc<R>, workers: usize, cancel: CancellationToken)
where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
    R: Reconciler<K> + ?Sized + 'static,
{
    info!(controller = reconciler.name(), workers, "starting workers");
    let mut set = JoinSet::new();
    for _ in 0..workers.max(1) {
        let queue = Arc::clone(&queue);
        let reconciler = Arc::clone(&reconciler);
        set.spawn(async move { while process_next_work_item(&queue, reconciler.as_ref()).await {} });
    }
    cancel.cancelled().await;
    queue.shut_down();
    while let Some(res) = set.join_next().await {
        if let Err(e) = res {
            warn!(controller = reconciler.name(), error = %e, "worker task ended abnormally");
        }
    }
    info!(controller = reconciler.name(), "workers stopped");
}
