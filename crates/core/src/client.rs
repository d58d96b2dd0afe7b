//! Collaborator contracts: remote API clients, local caches and event handlers.

use std::fmt;
use std::sync::Arc;

use crate::error::{ClientError, SyncResult};
use crate::object::Object;
use crate::resource::{cluster_aware_name, meta_namespace_key, ResourceType};

/// Address of a single object on one side of the sync.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub resource: ResourceType,
    /// Logical cluster; `None` downstream.
    pub cluster: Option<String>,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn new(resource: ResourceType, namespace: Option<&str>, name: &str) -> Self {
        Self { resource, cluster: None, namespace: namespace.map(str::to_string), name: name.to_string() }
    }

    pub fn in_cluster(mut self, cluster: &str) -> Self {
        self.cluster = Some(cluster.to_string());
        self
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match &self.cluster {
            Some(c) => cluster_aware_name(c, &self.name),
            None => self.name.clone(),
        };
        write!(f, "{} {}", self.resource, meta_namespace_key(self.namespace.as_deref(), &name))
    }
}

/// Symmetric client over the upstream or downstream API surface.
#[async_trait::async_trait]
pub trait RemoteClient: Send + Sync {
    async fn get(&self, target: &ObjectRef) -> Result<Object, ClientError>;
    async fn create(&self, target: &ObjectRef, obj: &Object) -> Result<Object, ClientError>;
    async fn update(&self, target: &ObjectRef, obj: &Object) -> Result<Object, ClientError>;
    /// Write only the `status` subresource.
    async fn update_status(&self, target: &ObjectRef, obj: &Object) -> Result<Object, ClientError>;
    async fn delete(&self, target: &ObjectRef) -> Result<(), ClientError>;
    /// Server-side apply owned by `field_manager`; `force` takes over conflicting fields.
    async fn apply(&self, target: &ObjectRef, obj: &Object, field_manager: &str, force: bool)
        -> Result<Object, ClientError>;
}

/// Read-only view of an eventually consistent local cache.
pub trait ObjectCache: Send + Sync {
    fn get_by_key(&self, resource: &ResourceType, key: &str) -> SyncResult<Option<Arc<Object>>>;
    fn list_by_index(&self, resource: &ResourceType, index: &str, value: &str) -> SyncResult<Vec<Arc<Object>>>;
}

/// Change notifications for one resource type. `key` is the cache key.
pub trait EventHandler: Send + Sync {
    fn on_add(&self, key: &str, obj: &Object);
    fn on_update(&self, key: &str, old: &Object, new: &Object);
    fn on_delete(&self, key: &str, obj: &Object);
}
