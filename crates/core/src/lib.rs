//! Tandem core types: documents, resource keys, namespace locators, sync-target
//! identity and the collaborator traits the reconcilers are written against.

#![forbid(unsafe_code)]

pub mod client;
pub mod error;
pub mod locator;
pub mod object;
pub mod resource;
pub mod target;
pub mod wellknown;

pub use client::{EventHandler, ObjectCache, ObjectRef, RemoteClient};
pub use error::{ClientError, SyncError, SyncResult};
pub use locator::{downstream_namespace_for, locator_for, parse_locator, NamespaceLocator, TargetRef};
pub use object::Object;
pub use resource::{QueueKey, ResourceType};
pub use target::SyncTarget;

/// A single change observed by a watch, fed into a local cache.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Applied(Object),
    Deleted(Object),
    /// Full relist after a (re)started watch; anything not listed is gone.
    Replaced(Vec<Object>),
}

pub mod prelude {
    pub use super::{
        Delta, EventHandler, NamespaceLocator, Object, ObjectCache, ObjectRef, QueueKey, RemoteClient,
        ResourceType, SyncError, SyncResult, SyncTarget,
    };
}
