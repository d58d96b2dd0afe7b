//! Tandem kubehub: kube-rs clients, discovery and watcher wiring.

#![forbid(unsafe_code)]

mod config;
mod discovery;
mod error;
mod remote;
mod watch;

use kube::core::DynamicObject;
use tandem_core::wellknown::LOGICAL_CLUSTER_ANNOTATION;
use tandem_core::{ClientError, Object};

pub use config::{cluster_config, load_config};
pub use discovery::{ResolvedResource, ResourceResolver};
pub use error::classify;
pub use remote::{ClusterScope, KubeRemote};
pub use watch::{spawn_informer, start_watcher};

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

/// Convert a wire object into an [`Object`], recording its logical cluster when known.
pub(crate) fn object_from(dyn_obj: &DynamicObject, cluster: Option<&str>) -> Result<Object, ClientError> {
    let mut raw = serde_json::to_value(dyn_obj).map_err(|e| ClientError::Transport(format!("decode object: {e}")))?;
    strip_managed_fields(&mut raw);
    let mut obj = Object::try_from(raw).map_err(|e| ClientError::Transport(e.to_string()))?;
    if let Some(cluster) = cluster.filter(|c| !c.is_empty() && *c != "*") {
        if obj.logical_cluster().is_none() {
            obj.set_annotation(LOGICAL_CLUSTER_ANNOTATION, cluster);
        }
    }
    Ok(obj)
}

pub(crate) fn dynamic_from(obj: &Object) -> Result<DynamicObject, ClientError> {
    serde_json::from_value(obj.to_value()).map_err(|e| ClientError::Transport(format!("encode object: {e}")))
}
