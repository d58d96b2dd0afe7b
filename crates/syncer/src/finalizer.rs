//! The upstream half of the deletion handshake.

use metrics::counter;
use tandem_core::resource::{cluster_aware_name, meta_namespace_key};
use tandem_core::{ObjectRef, ResourceType, SyncError, SyncResult};
use tracing::{debug, info};

use crate::SyncContext;

/// Add this target's finalizer to the upstream object if it is missing.
pub(crate) async fn ensure_syncer_finalizer(
    ctx: &SyncContext,
    gvr: &ResourceType,
    upstream: &tandem_core::Object,
    cluster: &str,
) -> SyncResult<()> {
    let finalizer = ctx.target.finalizer();
    if upstream.has_finalizer(&finalizer) {
        return Ok(());
    }
    let target = ObjectRef::new(gvr.clone(), upstream.namespace(), upstream.name()).in_cluster(cluster);
    let mut updated = upstream.clone();
    let mut finalizers = updated.finalizers();
    finalizers.push(finalizer);
    updated.set_finalizers(finalizers);
    ctx.upstream.update(&target, &updated).await.map_err(|e| SyncError::remote("add finalizer", &target, e))?;
    info!(gvr = %gvr, obj = %target, "added syncer finalizer upstream");
    Ok(())
}

/// Remove this target's finalizer from the upstream object, reading it from the upstream cache.
/// An object that is gone, or that does not carry the finalizer, is already in the desired state.
pub async fn ensure_upstream_finalizer_removed(
    ctx: &SyncContext,
    gvr: &ResourceType,
    upstream_namespace: &str,
    cluster: &str,
    upstream_name: &str,
) -> SyncResult<()> {
    let key = meta_namespace_key(Some(upstream_namespace), &cluster_aware_name(cluster, upstream_name));
    let Some(upstream) = ctx.upstream_cache.get_by_key(gvr, &key)? else {
        debug!(gvr = %gvr, key = %key, "upstream object gone; no finalizer to remove");
        return Ok(());
    };
    let finalizer = ctx.target.finalizer();
    if !upstream.has_finalizer(&finalizer) {
        return Ok(());
    }
    let mut updated = (*upstream).clone();
    let remaining: Vec<String> = updated.finalizers().into_iter().filter(|f| *f != finalizer).collect();
    updated.set_finalizers(remaining);
    let target = ObjectRef::new(gvr.clone(), Some(upstream_namespace), upstream_name).in_cluster(cluster);
    match ctx.upstream.update(&target, &updated).await {
        Ok(_) => {
            counter!("finalizers_removed_total", 1u64, "gvr" => gvr.to_string());
            info!(gvr = %gvr, obj = %target, "removed syncer finalizer upstream");
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(SyncError::remote("remove finalizer", &target, e)),
    }
}
