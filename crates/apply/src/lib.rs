//! Tandem apply: turn an upstream object into the body of a downstream
//! server-side apply, and decide which changes are worth a reconcile.

#![forbid(unsafe_code)]

mod predicate;

use serde_json::Value as Json;
use tandem_core::wellknown::LOGICAL_CLUSTER_ANNOTATION;
use tandem_core::{Object, ResourceType, SyncError, SyncResult};
use tracing::debug;

pub use predicate::{deep_equal_apart_from_status, deep_equal_finalizers_and_status};

/// The downstream cluster generates its own root CA config map; ours travels under another name.
pub const ROOT_CA_CONFIGMAP: &str = "kube-root-ca.crt";
pub const DOWNSTREAM_ROOT_CA_CONFIGMAP: &str = "tandem-root-ca.crt";

fn is_configmaps(resource: &ResourceType) -> bool {
    resource.group.is_empty() && resource.resource == "configmaps"
}

pub fn downstream_name_for(resource: &ResourceType, upstream_name: &str) -> String {
    if is_configmaps(resource) && upstream_name == ROOT_CA_CONFIGMAP {
        DOWNSTREAM_ROOT_CA_CONFIGMAP.to_string()
    } else {
        upstream_name.to_string()
    }
}

pub fn upstream_name_for(resource: &ResourceType, downstream_name: &str) -> String {
    if is_configmaps(resource) && downstream_name == DOWNSTREAM_ROOT_CA_CONFIGMAP {
        ROOT_CA_CONFIGMAP.to_string()
    } else {
        downstream_name.to_string()
    }
}

/// Metadata the downstream API server owns, or that would tie the copy's
/// lifecycle to upstream objects it cannot see.
const STRIPPED_METADATA: &[&str] = &[
    "uid",
    "resourceVersion",
    "managedFields",
    "ownerReferences",
    "finalizers",
    "deletionTimestamp",
    "deletionGracePeriodSeconds",
    "creationTimestamp",
    "generation",
    "selfLink",
];

/// Deep copy of `upstream` ready to be applied into `downstream_namespace`.
pub fn prepare_downstream(resource: &ResourceType, upstream: &Object, downstream_namespace: &str) -> Object {
    let mut obj = upstream.clone();
    for field in STRIPPED_METADATA {
        obj.remove_meta(field);
    }
    obj.remove_annotation(LOGICAL_CLUSTER_ANNOTATION);
    // status is a subresource: an apply on the main resource would ignore it anyway
    obj.remove("status");
    obj.set_namespace(Some(downstream_namespace));
    let name = downstream_name_for(resource, upstream.name());
    if name != upstream.name() {
        debug!(gvr = %resource, from = upstream.name(), to = %name, "renamed for downstream");
        obj.set_name(&name);
    }
    obj
}

/// Replace `obj.spec` with `upstream_spec` patched by the RFC 6902 document `patch`.
///
/// Objects without a spec are left alone. Decode and apply failures are
/// [`SyncError::Overlay`], which the queue retries: the author can fix the annotation.
pub fn apply_spec_overlay(obj: &mut Object, upstream_spec: Option<&Json>, patch: &str) -> SyncResult<()> {
    let Some(spec) = upstream_spec else {
        return Ok(());
    };
    let target = obj.name().to_string();
    let ops: json_patch::Patch = serde_json::from_str(patch)
        .map_err(|e| SyncError::Overlay { target: target.clone(), message: format!("decode: {e}") })?;
    let mut patched = spec.clone();
    json_patch::patch(&mut patched, &ops.0)
        .map_err(|e| SyncError::Overlay { target: target.clone(), message: format!("apply: {e}") })?;
    if !patched.is_object() {
        return Err(SyncError::Overlay { target, message: "patched spec is not an object".into() });
    }
    obj.insert("spec", patched);
    Ok(())
}
