//! Upward reconciler: report downstream status, and downstream absence, to the upstream object.

use std::sync::Arc;

use metrics::counter;
use tandem_apply::upstream_name_for;
use tandem_core::resource::{cluster_aware_name, meta_namespace_key, split_meta_namespace_key};
use tandem_core::{parse_locator, NamespaceLocator, ObjectRef, QueueKey, ResourceType, SyncError, SyncResult};
use tandem_queue::Reconciler;
use tracing::{debug, info};

use crate::finalizer::ensure_upstream_finalizer_removed;
use crate::SyncContext;

pub struct StatusReconciler {
    ctx: Arc<SyncContext>,
}

impl StatusReconciler {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Locator of `namespace` if it is a shadow namespace owned by this target.
    fn owned_locator(&self, namespace: &str) -> SyncResult<Option<NamespaceLocator>> {
        if namespace.starts_with(&self.ctx.syncer_namespace_prefix) {
            return Ok(None);
        }
        let Some(ns) = self.ctx.downstream_cache.get_by_key(&ResourceType::namespaces(), namespace)? else {
            debug!(namespace, "downstream namespace not in cache; skipping");
            return Ok(None);
        };
        let Some(locator) = parse_locator(&ns)? else {
            return Ok(None);
        };
        if !locator.matches_target(&self.ctx.target) {
            debug!(namespace, "namespace belongs to another sync target");
            return Ok(None);
        }
        Ok(Some(locator))
    }

    async fn update_status_upstream(
        &self,
        gvr: &ResourceType,
        locator: &NamespaceLocator,
        upstream_name: &str,
        status: &serde_json::Value,
    ) -> SyncResult<()> {
        let key = meta_namespace_key(
            Some(&locator.namespace),
            &cluster_aware_name(&locator.logical_cluster, upstream_name),
        );
        let Some(existing) = self.ctx.upstream_cache.get_by_key(gvr, &key)? else {
            debug!(gvr = %gvr, key = %key, "upstream object not in cache; nothing to report to");
            return Ok(());
        };
        let target = ObjectRef::new(gvr.clone(), Some(&locator.namespace), upstream_name)
            .in_cluster(&locator.logical_cluster);
        let mut updated = (*existing).clone();

        let res = if self.ctx.advanced {
            updated.set_annotation(&self.ctx.target.status_annotation(), &serde_json::to_string(status)?);
            if updated == *existing {
                debug!(obj = %target, "status annotation already current");
                return Ok(());
            }
            self.ctx.upstream.update(&target, &updated).await
        } else {
            if existing.get("status") == Some(status) {
                debug!(obj = %target, "status already current");
                return Ok(());
            }
            updated.insert("status", status.clone());
            self.ctx.upstream.update_status(&target, &updated).await
        };
        match res {
            Ok(_) => {
                counter!("status_updates_total", 1u64, "gvr" => gvr.to_string());
                info!(obj = %target, advanced = self.ctx.advanced, "updated upstream status");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(SyncError::remote("update status", &target, e)),
        }
    }
}

#[async_trait::async_trait]
impl Reconciler<QueueKey> for StatusReconciler {
    fn name(&self) -> &'static str {
        "status"
    }

    async fn reconcile(&self, item: &QueueKey) -> SyncResult<()> {
        let gvr = &item.resource;
        let (namespace, name) = split_meta_namespace_key(&item.key)?;
        let Some(namespace) = namespace else {
            return Ok(());
        };
        let Some(locator) = self.owned_locator(namespace)? else {
            return Ok(());
        };
        let upstream_name = upstream_name_for(gvr, name);

        let Some(downstream) = self.ctx.downstream_cache.get_by_key(gvr, &item.key)? else {
            debug!(gvr = %gvr, key = %item.key, "downstream object gone; releasing upstream finalizer");
            return ensure_upstream_finalizer_removed(
                &self.ctx,
                gvr,
                &locator.namespace,
                &locator.logical_cluster,
                &upstream_name,
            )
            .await;
        };
        match downstream.get("status") {
            None => Ok(()),
            Some(status) => self.update_status_upstream(gvr, &locator, &upstream_name, status).await,
        }
    }
}
