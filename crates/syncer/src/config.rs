use std::time::Duration;

use serde::{Deserialize, Serialize};
use tandem_core::wellknown::SYNCER_NAMESPACE_PREFIX;
use tandem_core::{ResourceType, SyncTarget};

/// Everything one syncer process needs to know about what it syncs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncerConfig {
    pub target: SyncTarget,
    /// Per-target overlays, status annotations, finalizers and deletion intent.
    pub advanced_scheduling: bool,
    /// Worker loops per reconciler.
    pub workers: usize,
    /// Informer resync period in seconds; 0 disables.
    pub resync_secs: u64,
    /// Namespaced resource types synced down (and their status synced up).
    pub resources: Vec<ResourceType>,
    /// Upstream API endpoint as seen from downstream workloads.
    pub upstream_url: String,
    /// Downstream namespaces with this prefix hold the syncer's own state and are never synced.
    pub syncer_namespace_prefix: String,
}

impl SyncerConfig {
    pub fn new(target: SyncTarget, upstream_url: &str) -> Self {
        Self {
            target,
            advanced_scheduling: false,
            workers: 2,
            resync_secs: 0,
            resources: Vec::new(),
            upstream_url: upstream_url.to_string(),
            syncer_namespace_prefix: SYNCER_NAMESPACE_PREFIX.to_string(),
        }
    }

    pub fn resync(&self) -> Option<Duration> {
        (self.resync_secs > 0).then(|| Duration::from_secs(self.resync_secs))
    }

    /// Configured resources minus namespaces, which are handled separately.
    pub fn synced_resources(&self) -> impl Iterator<Item = &ResourceType> {
        let namespaces = ResourceType::namespaces();
        self.resources.iter().filter(move |r| **r != namespaces)
    }
}
