//! Tandem syncer: mirrors upstream objects into a physical cluster and reports
//! their status back.
//!
//! Three reconcilers share one [`SyncContext`]:
//! - [`SpecReconciler`] pushes upstream desired state down;
//! - [`StatusReconciler`] pushes downstream status (and absence) up;
//! - [`NamespaceReconciler`] removes shadow namespaces whose origin is gone.

#![forbid(unsafe_code)]

pub mod config;
pub mod finalizer;
pub mod handlers;
pub mod mutators;
pub mod namespace;
pub mod spec;
pub mod status;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tandem_core::{ObjectCache, QueueKey, RemoteClient, ResourceType, SyncTarget};
use tandem_queue::{run_workers, Backoff, WorkQueue};
use tandem_store::{
    by_cluster_namespace, by_namespace, cluster_aware_key, namespace_key, InformerCache, InformerOptions,
    CLUSTER_NAMESPACE_INDEX, NAMESPACE_INDEX,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

pub use config::SyncerConfig;
pub use finalizer::ensure_upstream_finalizer_removed;
pub use handlers::{locator_index, LOCATOR_INDEX};
pub use mutators::{Mutator, MutatorRegistry};
pub use namespace::NamespaceReconciler;
pub use spec::SpecReconciler;
pub use status::StatusReconciler;

/// Shared, read-mostly state of one syncer instance.
pub struct SyncContext {
    pub target: SyncTarget,
    pub advanced: bool,
    pub syncer_namespace_prefix: String,
    /// Synced resource types, namespaces excluded.
    pub resources: Vec<ResourceType>,
    pub upstream: Arc<dyn RemoteClient>,
    pub downstream: Arc<dyn RemoteClient>,
    pub upstream_cache: Arc<dyn ObjectCache>,
    pub downstream_cache: Arc<dyn ObjectCache>,
}

/// Informer settings for upstream objects: keys carry the logical cluster, and
/// namespaced objects are indexed by `cluster|namespace`.
pub fn upstream_informer_options(config: &SyncerConfig) -> InformerOptions {
    InformerOptions::new(cluster_aware_key)
        .with_resync(config.resync())
        .with_index(CLUSTER_NAMESPACE_INDEX, by_cluster_namespace())
}

/// Informer settings for downstream objects of `gvr`; namespaces also get the locator index.
pub fn downstream_informer_options(config: &SyncerConfig, gvr: &ResourceType) -> InformerOptions {
    let opts = InformerOptions::new(namespace_key).with_resync(config.resync());
    if *gvr == ResourceType::namespaces() {
        opts.with_index(LOCATOR_INDEX, locator_index())
    } else {
        opts.with_index(NAMESPACE_INDEX, by_namespace())
    }
}

pub struct Syncer {
    config: SyncerConfig,
    ctx: Arc<SyncContext>,
    spec_queue: Arc<WorkQueue<QueueKey>>,
    status_queue: Arc<WorkQueue<QueueKey>>,
    namespace_queue: Arc<WorkQueue<String>>,
    spec: Arc<SpecReconciler>,
    status: Arc<StatusReconciler>,
    cleanup: Arc<NamespaceReconciler>,
}

impl Syncer {
    /// Builds a syncer with the built-in mutators.
    pub fn new(
        config: SyncerConfig,
        upstream: Arc<dyn RemoteClient>,
        downstream: Arc<dyn RemoteClient>,
        upstream_cache: Arc<dyn ObjectCache>,
        downstream_cache: Arc<dyn ObjectCache>,
    ) -> Result<Self> {
        let url = Url::parse(&config.upstream_url).with_context(|| format!("upstream url {:?}", config.upstream_url))?;
        let mutators = MutatorRegistry::builtin(&url);
        Ok(Self::with_mutators(config, mutators, upstream, downstream, upstream_cache, downstream_cache))
    }

    pub fn with_mutators(
        config: SyncerConfig,
        mutators: MutatorRegistry,
        upstream: Arc<dyn RemoteClient>,
        downstream: Arc<dyn RemoteClient>,
        upstream_cache: Arc<dyn ObjectCache>,
        downstream_cache: Arc<dyn ObjectCache>,
    ) -> Self {
        let ctx = Arc::new(SyncContext {
            target: config.target.clone(),
            advanced: config.advanced_scheduling,
            syncer_namespace_prefix: config.syncer_namespace_prefix.clone(),
            resources: config.synced_resources().cloned().collect(),
            upstream,
            downstream,
            upstream_cache,
            downstream_cache,
        });
        Self {
            spec_queue: Arc::new(WorkQueue::new("spec", Backoff::default())),
            status_queue: Arc::new(WorkQueue::new("status", Backoff::default())),
            namespace_queue: Arc::new(WorkQueue::new("namespace-cleanup", Backoff::default())),
            spec: Arc::new(SpecReconciler::new(Arc::clone(&ctx), mutators)),
            status: Arc::new(StatusReconciler::new(Arc::clone(&ctx))),
            cleanup: Arc::new(NamespaceReconciler::new(Arc::clone(&ctx))),
            ctx,
            config,
        }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    pub fn spec_queue(&self) -> &Arc<WorkQueue<QueueKey>> {
        &self.spec_queue
    }

    pub fn status_queue(&self) -> &Arc<WorkQueue<QueueKey>> {
        &self.status_queue
    }

    pub fn namespace_queue(&self) -> &Arc<WorkQueue<String>> {
        &self.namespace_queue
    }

    /// Register one handler per watched type. Both caches need informers for every
    /// configured resource plus namespaces.
    pub fn register_handlers(&self, upstream: &InformerCache, downstream: &InformerCache) -> Result<()> {
        let namespaces = ResourceType::namespaces();
        for gvr in self.config.synced_resources() {
            upstream
                .informer(gvr)
                .ok_or_else(|| anyhow!("no upstream informer for {gvr}"))?
                .add_handler(Arc::new(handlers::SpecHandler { gvr: gvr.clone(), queue: Arc::clone(&self.spec_queue) }));
            downstream
                .informer(gvr)
                .ok_or_else(|| anyhow!("no downstream informer for {gvr}"))?
                .add_handler(Arc::new(handlers::StatusHandler { gvr: gvr.clone(), queue: Arc::clone(&self.status_queue) }));
        }
        downstream
            .informer(&namespaces)
            .ok_or_else(|| anyhow!("no downstream informer for {namespaces}"))?
            .add_handler(Arc::new(handlers::DownstreamNamespaceHandler { queue: Arc::clone(&self.namespace_queue) }));
        upstream
            .informer(&namespaces)
            .ok_or_else(|| anyhow!("no upstream informer for {namespaces}"))?
            .add_handler(Arc::new(handlers::UpstreamNamespaceHandler {
                downstream_cache: Arc::clone(&self.ctx.downstream_cache),
                queue: Arc::clone(&self.namespace_queue),
            }));
        Ok(())
    }

    /// Run all worker pools until `cancel` fires. Caches must have synced before this is called.
    pub async fn run(&self, cancel: CancellationToken) {
        let workers = self.config.workers.max(1);
        info!(
            target_name = %self.ctx.target.name,
            target_key = %self.ctx.target.key,
            advanced = self.ctx.advanced,
            workers,
            "syncer starting"
        );
        tokio::join!(
            run_workers(Arc::clone(&self.spec_queue), Arc::clone(&self.spec), workers, cancel.clone()),
            run_workers(Arc::clone(&self.status_queue), Arc::clone(&self.status), workers, cancel.clone()),
            run_workers(Arc::clone(&self.namespace_queue), Arc::clone(&self.cleanup), workers, cancel.clone()),
        );
        info!("syncer stopped");
    }
}
