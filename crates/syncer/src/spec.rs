//! Downward reconciler: make the downstream copy match the upstream object.

use std::sync::Arc;

use metrics::counter;
use tandem_apply::{apply_spec_overlay, downstream_name_for, prepare_downstream};
use tandem_core::resource::{split_cluster_aware_name, split_meta_namespace_key};
use tandem_core::wellknown::{NAMESPACE_LOCATOR_ANNOTATION, STATE_SYNC, SYNCER_FIELD_MANAGER};
use tandem_core::{
    downstream_namespace_for, locator_for, NamespaceLocator, Object, ObjectRef, QueueKey, ResourceType, SyncError,
    SyncResult,
};
use tandem_queue::Reconciler;
use tracing::{debug, info};

use crate::finalizer::{ensure_syncer_finalizer, ensure_upstream_finalizer_removed};
use crate::mutators::MutatorRegistry;
use crate::SyncContext;

pub struct SpecReconciler {
    ctx: Arc<SyncContext>,
    mutators: MutatorRegistry,
}

/// Where one upstream key lands downstream.
struct Placement<'a> {
    cluster: &'a str,
    upstream_namespace: &'a str,
    upstream_name: &'a str,
    locator: NamespaceLocator,
    downstream: ObjectRef,
}

impl SpecReconciler {
    pub fn new(ctx: Arc<SyncContext>, mutators: MutatorRegistry) -> Self {
        Self { ctx, mutators }
    }

    fn place<'a>(&self, gvr: &ResourceType, key: &'a str) -> SyncResult<Option<Placement<'a>>> {
        let (namespace, cluster_aware) = split_meta_namespace_key(key)?;
        let Some(upstream_namespace) = namespace else {
            debug!(gvr = %gvr, key, "cluster-scoped object; not synced");
            return Ok(None);
        };
        let (cluster, upstream_name) = split_cluster_aware_name(cluster_aware);
        let cluster = cluster.ok_or_else(|| SyncError::malformed("key", format!("{key:?} has no logical cluster")))?;
        let target = self.ctx.advanced.then_some(&self.ctx.target);
        let locator = locator_for(cluster, upstream_namespace, target);
        let downstream_namespace = downstream_namespace_for(&locator);
        let downstream =
            ObjectRef::new(gvr.clone(), Some(&downstream_namespace), &downstream_name_for(gvr, upstream_name));
        Ok(Some(Placement { cluster, upstream_namespace, upstream_name, locator, downstream }))
    }

    async fn delete_downstream(&self, p: &Placement<'_>) -> SyncResult<bool> {
        match self.ctx.downstream.delete(&p.downstream).await {
            Ok(()) => {
                counter!("spec_deletes_total", 1u64, "gvr" => p.downstream.resource.to_string());
                info!(obj = %p.downstream, "deleted downstream object");
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(SyncError::remote("delete", &p.downstream, e)),
        }
    }

    async fn ensure_downstream_namespace(&self, p: &Placement<'_>) -> SyncResult<()> {
        let Some(name) = p.downstream.namespace.as_deref() else {
            return Ok(());
        };
        let namespaces = ResourceType::namespaces();
        if self.ctx.downstream_cache.get_by_key(&namespaces, name)?.is_some() {
            return Ok(());
        }
        let mut ns = Object::new("v1", "Namespace", name);
        ns.set_annotation(NAMESPACE_LOCATOR_ANNOTATION, &p.locator.to_annotation()?);
        ns.set_label(&self.ctx.target.state_label(), STATE_SYNC);
        let target = ObjectRef::new(namespaces, None, name);
        match self.ctx.downstream.create(&target, &ns).await {
            Ok(_) => {
                counter!("namespaces_created_total", 1u64);
                info!(namespace = name, cluster = p.cluster, upstream = p.upstream_namespace, "created downstream namespace");
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(SyncError::remote("create namespace", &target, e)),
        }
    }

    /// Advanced mode: the scheduler asked for removal from this target and nobody else holds it here.
    fn removal_requested(&self, upstream: &Object) -> bool {
        let set = |key: String| upstream.annotation(&key).is_some_and(|v| !v.is_empty());
        self.ctx.advanced
            && set(self.ctx.target.deletion_annotation())
            && !set(self.ctx.target.finalizers_annotation())
    }

    async fn remove_from_target(&self, gvr: &ResourceType, p: &Placement<'_>) -> SyncResult<()> {
        let confirmed_gone = if self.delete_downstream(p).await? {
            // the delete may be graceful; only a miss proves the object is gone
            match self.ctx.downstream.get(&p.downstream).await {
                Err(e) if e.is_not_found() => true,
                Err(e) => return Err(SyncError::remote("get", &p.downstream, e)),
                Ok(_) => false,
            }
        } else {
            true
        };
        if !confirmed_gone {
            debug!(obj = %p.downstream, "downstream object still terminating; finalizer left for status sync");
            return Ok(());
        }
        ensure_upstream_finalizer_removed(&self.ctx, gvr, p.upstream_namespace, p.cluster, p.upstream_name).await
    }

    async fn apply_to_downstream(&self, gvr: &ResourceType, p: &Placement<'_>, upstream: &Object) -> SyncResult<()> {
        self.ensure_downstream_namespace(p).await?;
        if self.ctx.advanced {
            ensure_syncer_finalizer(&self.ctx, gvr, upstream, p.cluster).await?;
        }

        if self.removal_requested(upstream) {
            return self.remove_from_target(gvr, p).await;
        }

        let downstream_namespace = p.downstream.namespace.as_deref().unwrap_or_default();
        let mut obj = prepare_downstream(gvr, upstream, downstream_namespace);
        if self.ctx.advanced {
            if let Some(patch) = upstream.annotation(&self.ctx.target.spec_diff_annotation()).filter(|v| !v.is_empty()) {
                apply_spec_overlay(&mut obj, upstream.get("spec"), patch)?;
            }
        }
        self.mutators.mutate(gvr, &mut obj)?;

        self.ctx
            .downstream
            .apply(&p.downstream, &obj, SYNCER_FIELD_MANAGER, true)
            .await
            .map_err(|e| SyncError::remote("apply", &p.downstream, e))?;
        counter!("spec_upserts_total", 1u64, "gvr" => gvr.to_string());
        info!(obj = %p.downstream, cluster = p.cluster, ns = p.upstream_namespace, name = p.upstream_name, "upserted downstream object");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Reconciler<QueueKey> for SpecReconciler {
    fn name(&self) -> &'static str {
        "spec"
    }

    async fn reconcile(&self, item: &QueueKey) -> SyncResult<()> {
        let gvr = &item.resource;
        let Some(placement) = self.place(gvr, &item.key)? else {
            return Ok(());
        };
        match self.ctx.upstream_cache.get_by_key(gvr, &item.key)? {
            None => {
                debug!(gvr = %gvr, key = %item.key, "upstream object gone; deleting downstream");
                self.delete_downstream(&placement).await.map(|_| ())
            }
            Some(upstream) => self.apply_to_downstream(gvr, &placement, &upstream).await,
        }
    }
}
