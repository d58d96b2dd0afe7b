//! Event handlers turning cache notifications into queue keys.

use std::sync::Arc;

use smallvec::{smallvec, SmallVec};
use tandem_apply::{deep_equal_apart_from_status, deep_equal_finalizers_and_status};
use tandem_core::resource::cluster_aware_name;
use tandem_core::{parse_locator, EventHandler, Object, ObjectCache, QueueKey, ResourceType};
use tandem_queue::WorkQueue;
use tandem_store::{IndexFn, IndexValues};
use tracing::warn;

/// Downstream namespaces indexed by their upstream origin, `cluster|namespace`.
pub const LOCATOR_INDEX: &str = "namespace-locator";

pub fn locator_index() -> IndexFn {
    Arc::new(|obj: &Object| -> IndexValues {
        match parse_locator(obj) {
            Ok(Some(l)) => smallvec![cluster_aware_name(&l.logical_cluster, &l.namespace)],
            _ => SmallVec::new(),
        }
    })
}

/// Upstream objects of one type, feeding the spec queue.
pub struct SpecHandler {
    pub gvr: ResourceType,
    pub queue: Arc<WorkQueue<QueueKey>>,
}

impl EventHandler for SpecHandler {
    fn on_add(&self, key: &str, _obj: &Object) {
        self.queue.add(QueueKey::new(self.gvr.clone(), key));
    }

    fn on_update(&self, key: &str, old: &Object, new: &Object) {
        if !deep_equal_apart_from_status(old, new) {
            self.queue.add(QueueKey::new(self.gvr.clone(), key));
        }
    }

    fn on_delete(&self, key: &str, _obj: &Object) {
        self.queue.add(QueueKey::new(self.gvr.clone(), key));
    }
}

/// Downstream objects of one type, feeding the status queue.
pub struct StatusHandler {
    pub gvr: ResourceType,
    pub queue: Arc<WorkQueue<QueueKey>>,
}

impl EventHandler for StatusHandler {
    fn on_add(&self, key: &str, _obj: &Object) {
        self.queue.add(QueueKey::new(self.gvr.clone(), key));
    }

    fn on_update(&self, key: &str, old: &Object, new: &Object) {
        if !deep_equal_finalizers_and_status(old, new) {
            self.queue.add(QueueKey::new(self.gvr.clone(), key));
        }
    }

    fn on_delete(&self, key: &str, _obj: &Object) {
        self.queue.add(QueueKey::new(self.gvr.clone(), key));
    }
}

/// Downstream namespaces: every add and update (resyncs included) is a cleanup check.
pub struct DownstreamNamespaceHandler {
    pub queue: Arc<WorkQueue<String>>,
}

impl EventHandler for DownstreamNamespaceHandler {
    fn on_add(&self, key: &str, _obj: &Object) {
        self.queue.add(key.to_string());
    }

    fn on_update(&self, key: &str, _old: &Object, _new: &Object) {
        self.queue.add(key.to_string());
    }

    fn on_delete(&self, _key: &str, _obj: &Object) {}
}

/// Upstream namespaces: a delete checks the shadows recorded for it.
pub struct UpstreamNamespaceHandler {
    pub downstream_cache: Arc<dyn ObjectCache>,
    pub queue: Arc<WorkQueue<String>>,
}

impl EventHandler for UpstreamNamespaceHandler {
    fn on_add(&self, _key: &str, _obj: &Object) {}

    fn on_update(&self, _key: &str, _old: &Object, _new: &Object) {}

    fn on_delete(&self, key: &str, _obj: &Object) {
        match self.downstream_cache.list_by_index(&ResourceType::namespaces(), LOCATOR_INDEX, key) {
            Ok(shadows) => {
                for ns in shadows {
                    self.queue.add(ns.name().to_string());
                }
            }
            Err(e) => warn!(key, error = %e, "cannot look up downstream namespaces for deleted upstream namespace"),
        }
    }
}
