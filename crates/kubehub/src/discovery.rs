use std::sync::Mutex;

use kube::core::ApiResource;
use kube::discovery::{Discovery, Scope};
use kube::Client;
use rustc_hash::FxHashMap;
use tandem_core::{ClientError, ResourceType};
use tracing::debug;

use crate::error::classify;

#[derive(Debug, Clone)]
pub struct ResolvedResource {
    pub api: ApiResource,
    pub namespaced: bool,
}

/// Resolves resource types through API discovery, once per type.
pub struct ResourceResolver {
    client: Client,
    cache: Mutex<FxHashMap<ResourceType, ResolvedResource>>,
}

impl ResourceResolver {
    pub fn new(client: Client) -> Self {
        Self { client, cache: Mutex::new(FxHashMap::default()) }
    }

    fn cached(&self, gvr: &ResourceType) -> Option<ResolvedResource> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).get(gvr).cloned()
    }

    /// Seed a resolution without asking the server (tests, well-known types).
    pub fn insert(&self, gvr: ResourceType, resolved: ResolvedResource) {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).insert(gvr, resolved);
    }

    pub async fn resolve(&self, gvr: &ResourceType) -> Result<ResolvedResource, ClientError> {
        if let Some(hit) = self.cached(gvr) {
            return Ok(hit);
        }
        let discovery =
            Discovery::new(self.client.clone()).filter(&[gvr.group.as_str()]).run().await.map_err(classify)?;
        let group = discovery
            .get(&gvr.group)
            .ok_or_else(|| ClientError::NotFound(format!("api group {:?} not served", gvr.group)))?;
        let (api, caps) = group
            .versioned_resources(&gvr.version)
            .into_iter()
            .find(|(ar, _)| ar.plural == gvr.resource)
            .ok_or_else(|| ClientError::NotFound(format!("resource {gvr} not served")))?;
        let resolved = ResolvedResource { api, namespaced: matches!(caps.scope, Scope::Namespaced) };
        debug!(gvr = %gvr, kind = %resolved.api.kind, namespaced = resolved.namespaced, "resolved resource");
        self.insert(gvr.clone(), resolved.clone());
        Ok(resolved)
    }
}
