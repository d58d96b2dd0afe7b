//! Key and index functions.

use std::sync::Arc;

use smallvec::{smallvec, SmallVec};
use tandem_core::resource::{cluster_aware_name, meta_namespace_key};
use tandem_core::Object;

pub type KeyFn = fn(&Object) -> String;
pub type IndexValues = SmallVec<[String; 2]>;
pub type IndexFn = Arc<dyn Fn(&Object) -> IndexValues + Send + Sync>;

pub const NAMESPACE_INDEX: &str = "namespace";
pub const CLUSTER_NAMESPACE_INDEX: &str = "cluster-namespace";

/// `namespace/name`: downstream objects.
pub fn namespace_key(obj: &Object) -> String {
    meta_namespace_key(obj.namespace(), obj.name())
}

/// `namespace/cluster|name`: upstream objects, which share names across logical clusters.
pub fn cluster_aware_key(obj: &Object) -> String {
    let name = cluster_aware_name(obj.logical_cluster().unwrap_or_default(), obj.name());
    meta_namespace_key(obj.namespace(), &name)
}

pub fn by_namespace() -> IndexFn {
    Arc::new(|obj: &Object| -> IndexValues {
        match obj.namespace() {
            Some(ns) => smallvec![ns.to_string()],
            None => SmallVec::new(),
        }
    })
}

/// `cluster|namespace` of namespaced upstream objects.
pub fn by_cluster_namespace() -> IndexFn {
    Arc::new(|obj: &Object| -> IndexValues {
        match obj.namespace() {
            Some(ns) => smallvec![cluster_aware_name(obj.logical_cluster().unwrap_or_default(), ns)],
            None => SmallVec::new(),
        }
    })
}
