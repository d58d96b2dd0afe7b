//! Resource types and cache keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Separates the logical cluster from the name in upstream keys (`cluster|name`).
pub const CLUSTER_SEPARATOR: char = '|';

/// Group/version/resource triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceType {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl ResourceType {
    pub fn new(group: &str, version: &str, resource: &str) -> Self {
        Self { group: group.to_string(), version: version.to_string(), resource: resource.to_string() }
    }

    pub fn namespaces() -> Self {
        Self::new("", "v1", "namespaces")
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// Renders as `resource.version.group` (`configmaps.v1` for the core group).
impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}.{}", self.resource, self.version)
        } else {
            write!(f, "{}.{}.{}", self.resource, self.version, self.group)
        }
    }
}

impl FromStr for ResourceType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(resource), Some(version), group) if !resource.is_empty() && !version.is_empty() => {
                Ok(Self::new(group.unwrap_or(""), version, resource))
            }
            _ => Err(SyncError::malformed(
                "resource type",
                format!("{s} (expect resource.version or resource.version.group)"),
            )),
        }
    }
}

/// `namespace/name`, or just `name` for cluster-scoped objects.
pub fn meta_namespace_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name.to_string(),
    }
}

pub fn split_meta_namespace_key(key: &str) -> SyncResult<(Option<&str>, &str)> {
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) if !name.is_empty() => Ok((None, name)),
        (Some(ns), Some(name), None) if !name.is_empty() => Ok((Some(ns).filter(|ns| !ns.is_empty()), name)),
        _ => Err(SyncError::malformed("key", format!("unexpected key format: {key:?}"))),
    }
}

pub fn cluster_aware_name(cluster: &str, name: &str) -> String {
    if cluster.is_empty() {
        name.to_string()
    } else {
        format!("{cluster}{CLUSTER_SEPARATOR}{name}")
    }
}

/// Split `cluster|name`; keys without a cluster yield `None`.
pub fn split_cluster_aware_name(key: &str) -> (Option<&str>, &str) {
    match key.split_once(CLUSTER_SEPARATOR) {
        Some((cluster, name)) => (Some(cluster).filter(|c| !c.is_empty()), name),
        None => (None, key),
    }
}

/// Work item shared by the spec and status queues.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueKey {
    pub resource: ResourceType,
    pub key: String,
}

impl QueueKey {
    pub fn new(resource: ResourceType, key: impl Into<String>) -> Self {
        Self { resource, key: key.into() }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.resource, self.key)
    }
}
