use std::sync::Arc;

use rustc_hash::FxHashMap;
use tandem_core::{Object, ObjectCache, ResourceType, SyncError, SyncResult};

use crate::Informer;

/// All informers of one side (upstream or downstream), looked up by resource type.
#[derive(Clone, Default)]
pub struct InformerCache {
    informers: FxHashMap<ResourceType, Informer>,
}

impl InformerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, informer: Informer) {
        self.informers.insert(informer.resource().clone(), informer);
    }

    pub fn informer(&self, resource: &ResourceType) -> Option<&Informer> {
        self.informers.get(resource)
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceType> {
        self.informers.keys()
    }

    /// Wait for every informer's first list. `false` if any ingest loop stopped first.
    pub async fn wait_for_sync(&self) -> bool {
        for informer in self.informers.values() {
            if !informer.wait_for_sync().await {
                return false;
            }
        }
        true
    }

    fn require(&self, resource: &ResourceType) -> SyncResult<&Informer> {
        self.informers.get(resource).ok_or_else(|| SyncError::Cache(format!("no informer for {resource}")))
    }
}

impl ObjectCache for InformerCache {
    fn get_by_key(&self, resource: &ResourceType, key: &str) -> SyncResult<Option<Arc<Object>>> {
        Ok(self.require(resource)?.current().get(key))
    }

    fn list_by_index(&self, resource: &ResourceType, index: &str, value: &str) -> SyncResult<Vec<Arc<Object>>> {
        self.require(resource)?
            .current()
            .by_index(index, value)
            .ok_or_else(|| SyncError::Cache(format!("{resource} has no index {index:?}")))
    }
}
