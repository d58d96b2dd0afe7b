//! Garbage collection of shadow namespaces whose upstream namespace is gone.
//!
//! Upstream informers are independent, so an object can be cached before its
//! namespace. A shadow namespace is only deleted once its upstream namespace is
//! absent and no synced type holds objects there.

use std::sync::Arc;

use metrics::counter;
use tandem_core::resource::cluster_aware_name;
use tandem_core::{parse_locator, ObjectRef, ResourceType, SyncError, SyncResult};
use tandem_queue::Reconciler;
use tandem_store::CLUSTER_NAMESPACE_INDEX;
use tracing::{debug, info};

use crate::SyncContext;

/// Keyed by downstream namespace name.
pub struct NamespaceReconciler {
    ctx: Arc<SyncContext>,
}

impl NamespaceReconciler {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Reconciler<String> for NamespaceReconciler {
    fn name(&self) -> &'static str {
        "namespace-cleanup"
    }

    async fn reconcile(&self, name: &String) -> SyncResult<()> {
        let namespaces = ResourceType::namespaces();
        let Some(ns) = self.ctx.downstream_cache.get_by_key(&namespaces, name)? else {
            debug!(namespace = %name, "downstream namespace gone");
            return Ok(());
        };
        let Some(locator) = parse_locator(&ns)? else {
            return Ok(());
        };
        if !locator.matches_target(&self.ctx.target) {
            return Ok(());
        }
        let upstream_key = cluster_aware_name(&locator.logical_cluster, &locator.namespace);
        if self.ctx.upstream_cache.get_by_key(&namespaces, &upstream_key)?.is_some() {
            return Ok(());
        }
        for gvr in &self.ctx.resources {
            if !self.ctx.upstream_cache.list_by_index(gvr, CLUSTER_NAMESPACE_INDEX, &upstream_key)?.is_empty() {
                debug!(namespace = %name, resource = %gvr, "upstream objects still present; keeping namespace");
                return Ok(());
            }
        }

        let target = ObjectRef::new(namespaces, None, name);
        match self.ctx.downstream.delete(&target).await {
            Ok(()) => {
                counter!("namespaces_cleaned_total", 1u64);
                info!(
                    namespace = %name,
                    cluster = %locator.logical_cluster,
                    upstream = %locator.namespace,
                    "deleted downstream namespace; upstream namespace is gone"
                );
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(SyncError::remote("delete namespace", &target, e)),
        }
    }
}
