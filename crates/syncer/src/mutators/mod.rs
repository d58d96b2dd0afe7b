//! Per-resource transforms run on the downstream copy right before it is applied.

mod deployment;
mod secret;

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tandem_core::{Object, ResourceType, SyncResult};
use url::Url;

pub use deployment::DeploymentMutator;
pub use secret::SecretMutator;

pub trait Mutator: Send + Sync {
    fn gvr(&self) -> ResourceType;
    fn mutate(&self, obj: &mut Object) -> SyncResult<()>;
}

#[derive(Clone, Default)]
pub struct MutatorRegistry {
    by_gvr: FxHashMap<ResourceType, Arc<dyn Mutator>>,
}

impl MutatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deployment and Secret mutators pointing workloads at `upstream_url`.
    pub fn builtin(upstream_url: &Url) -> Self {
        let mut r = Self::new();
        r.register(Arc::new(DeploymentMutator::new(upstream_url)));
        r.register(Arc::new(SecretMutator));
        r
    }

    /// Replaces any mutator already registered for the same type.
    pub fn register(&mut self, m: Arc<dyn Mutator>) {
        self.by_gvr.insert(m.gvr(), m);
    }

    pub fn get(&self, gvr: &ResourceType) -> Option<&Arc<dyn Mutator>> {
        self.by_gvr.get(gvr)
    }

    /// Run the mutator for `gvr`, if any.
    pub fn mutate(&self, gvr: &ResourceType, obj: &mut Object) -> SyncResult<()> {
        match self.get(gvr) {
            Some(m) => m.mutate(obj),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag;

    impl Mutator for Tag {
        fn gvr(&self) -> ResourceType {
            ResourceType::new("", "v1", "configmaps")
        }
        fn mutate(&self, obj: &mut Object) -> SyncResult<()> {
            obj.set_label("mutated", "true");
            Ok(())
        }
    }

    #[test]
    fn registry_dispatches_by_type() {
        let url = Url::parse("https://upstream.example:6443").unwrap();
        let mut r = MutatorRegistry::builtin(&url);
        assert!(r.get(&ResourceType::new("apps", "v1", "deployments")).is_some());
        assert!(r.get(&ResourceType::new("", "v1", "secrets")).is_some());

        let cms = ResourceType::new("", "v1", "configmaps");
        let mut cm = Object::new("v1", "ConfigMap", "x");
        r.mutate(&cms, &mut cm).unwrap();
        assert!(cm.labels().is_empty(), "no mutator registered yet");

        r.register(Arc::new(Tag));
        r.mutate(&cms, &mut cm).unwrap();
        assert_eq!(cm.labels().get("mutated").map(String::as_str), Some("true"));
    }
}
