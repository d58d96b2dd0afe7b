#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tandem_core::wellknown::{LOGICAL_CLUSTER_ANNOTATION, NAMESPACE_LOCATOR_ANNOTATION};
use tandem_core::{
    downstream_namespace_for, ClientError, Delta, NamespaceLocator, Object, ObjectRef, RemoteClient, ResourceType,
    SyncTarget,
};
use tandem_store::{spawn_ingest, InformerCache, InformerOptions};
use tandem_syncer::mutators::MutatorRegistry;
use tandem_syncer::{
    downstream_informer_options, upstream_informer_options, NamespaceReconciler, SpecReconciler, StatusReconciler,
    SyncContext, SyncerConfig,
};
use tokio::sync::mpsc;
use url::Url;

pub const UPSTREAM_URL: &str = "https://tandem.example:6443";

pub fn deployments() -> ResourceType {
    ResourceType::new("apps", "v1", "deployments")
}

pub fn configmaps() -> ResourceType {
    ResourceType::new("", "v1", "configmaps")
}

pub fn target() -> SyncTarget {
    SyncTarget::new("root:org", "edge-1", "6b9e9f3c-0d4b-4c39-9d0d-2f8b1b1d9c11")
}

pub fn other_target() -> SyncTarget {
    SyncTarget::new("root:org", "edge-2", "00000000-0000-0000-0000-000000000002")
}

pub fn config(target: SyncTarget, advanced: bool) -> SyncerConfig {
    let mut c = SyncerConfig::new(target, UPSTREAM_URL);
    c.advanced_scheduling = advanced;
    c.workers = 1;
    c.resources = vec![deployments(), configmaps(), ResourceType::namespaces()];
    c
}

/// Upstream Deployment in a logical cluster, as an informer would deliver it.
pub fn upstream_deployment(cluster: &str, ns: &str, name: &str) -> Object {
    let mut o = Object::try_from(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": name,
            "namespace": ns,
            "uid": "0c8e7a6e-upstream",
            "resourceVersion": "42",
            "annotations": {},
        },
        "spec": {
            "replicas": 1,
            "template": {"spec": {"containers": [{"name": "web", "image": "nginx"}]}},
        },
    }))
    .unwrap();
    o.set_annotation(LOGICAL_CLUSTER_ANNOTATION, cluster);
    o
}

pub fn upstream_namespace(cluster: &str, name: &str) -> Object {
    let mut o = Object::new("v1", "Namespace", name);
    o.set_annotation(LOGICAL_CLUSTER_ANNOTATION, cluster);
    o
}

/// Downstream namespace carrying `locator`, named the way the spec reconciler names it.
pub fn shadow_namespace(locator: &NamespaceLocator) -> Object {
    let mut o = Object::new("v1", "Namespace", &downstream_namespace_for(locator));
    o.set_annotation(NAMESPACE_LOCATOR_ANNOTATION, &locator.to_annotation().unwrap());
    o
}

pub fn downstream_deployment(ns: &str, name: &str, status: Option<serde_json::Value>) -> Object {
    let mut o = Object::try_from(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": name, "namespace": ns, "uid": "downstream-uid"},
        "spec": {"replicas": 1},
    }))
    .unwrap();
    if let Some(s) = status {
        o.insert("status", s);
    }
    o
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub op: &'static str,
    pub target: ObjectRef,
    pub body: Option<Object>,
}

/// In-memory API surface recording every call.
#[derive(Default)]
pub struct FakeRemote {
    objects: Mutex<HashMap<ObjectRef, Object>>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<&'static str, ClientError>>,
    graceful_delete: Mutex<bool>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, target: ObjectRef, obj: Object) {
        self.objects.lock().unwrap().insert(target, obj);
    }

    pub fn object(&self, target: &ObjectRef) -> Option<Object> {
        self.objects.lock().unwrap().get(target).cloned()
    }

    /// The next call of `op` fails with `err`.
    pub fn fail_next(&self, op: &'static str, err: ClientError) {
        self.failures.lock().unwrap().insert(op, err);
    }

    /// Deletes leave the object in place, as a graceful delete would.
    pub fn set_graceful_delete(&self, graceful: bool) {
        *self.graceful_delete.lock().unwrap() = graceful;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    pub fn ops(&self) -> Vec<&'static str> {
        self.calls().iter().map(|c| c.op).collect()
    }

    fn record(&self, op: &'static str, target: &ObjectRef, body: Option<&Object>) -> Result<(), ClientError> {
        self.calls.lock().unwrap().push(Call { op, target: target.clone(), body: body.cloned() });
        match self.failures.lock().unwrap().remove(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl RemoteClient for FakeRemote {
    async fn get(&self, target: &ObjectRef) -> Result<Object, ClientError> {
        self.record("get", target, None)?;
        self.object(target).ok_or_else(|| ClientError::NotFound(target.to_string()))
    }

    async fn create(&self, target: &ObjectRef, obj: &Object) -> Result<Object, ClientError> {
        self.record("create", target, Some(obj))?;
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(target) {
            return Err(ClientError::AlreadyExists(target.to_string()));
        }
        objects.insert(target.clone(), obj.clone());
        Ok(obj.clone())
    }

    async fn update(&self, target: &ObjectRef, obj: &Object) -> Result<Object, ClientError> {
        self.record("update", target, Some(obj))?;
        let mut objects = self.objects.lock().unwrap();
        let slot = objects.get_mut(target).ok_or_else(|| ClientError::NotFound(target.to_string()))?;
        *slot = obj.clone();
        Ok(obj.clone())
    }

    async fn update_status(&self, target: &ObjectRef, obj: &Object) -> Result<Object, ClientError> {
        self.record("update_status", target, Some(obj))?;
        let mut objects = self.objects.lock().unwrap();
        let slot = objects.get_mut(target).ok_or_else(|| ClientError::NotFound(target.to_string()))?;
        match obj.get("status") {
            Some(s) => slot.insert("status", s.clone()),
            None => slot.remove("status"),
        };
        Ok(slot.clone())
    }

    async fn delete(&self, target: &ObjectRef) -> Result<(), ClientError> {
        self.record("delete", target, None)?;
        let graceful = *self.graceful_delete.lock().unwrap();
        let mut objects = self.objects.lock().unwrap();
        if !objects.contains_key(target) {
            return Err(ClientError::NotFound(target.to_string()));
        }
        if !graceful {
            objects.remove(target);
        }
        Ok(())
    }

    async fn apply(
        &self,
        target: &ObjectRef,
        obj: &Object,
        field_manager: &str,
        force: bool,
    ) -> Result<Object, ClientError> {
        assert_eq!(field_manager, "syncer");
        assert!(force, "syncer applies always force");
        self.record("apply", target, Some(obj))?;
        self.objects.lock().unwrap().insert(target.clone(), obj.clone());
        Ok(obj.clone())
    }
}

/// One side's informers, fed directly instead of by a watch.
pub struct Side {
    pub cache: InformerCache,
    senders: HashMap<ResourceType, mpsc::Sender<Delta>>,
}

impl Side {
    pub async fn new(resources: &[ResourceType], opts: impl Fn(&ResourceType) -> InformerOptions) -> Self {
        let mut cache = InformerCache::new();
        let mut senders = HashMap::new();
        for gvr in resources {
            let (tx, informer) = spawn_ingest(gvr.clone(), opts(gvr));
            tx.send(Delta::Replaced(Vec::new())).await.unwrap();
            assert!(informer.wait_for_sync().await);
            cache.insert(informer);
            senders.insert(gvr.clone(), tx);
        }
        Self { cache, senders }
    }

    /// Replace the cached contents of `gvr` and wait until readers see them.
    pub async fn set(&self, gvr: &ResourceType, objs: Vec<Object>) {
        let mut epochs = self.cache.informer(gvr).unwrap().subscribe_epoch();
        epochs.borrow_and_update();
        self.senders[gvr].send(Delta::Replaced(objs)).await.unwrap();
        epochs.changed().await.unwrap();
    }
}

/// Reconcilers wired to fake clients and real informer caches.
pub struct Env {
    pub config: SyncerConfig,
    pub upstream: Arc<FakeRemote>,
    pub downstream: Arc<FakeRemote>,
    pub up: Side,
    pub down: Side,
    pub ctx: Arc<SyncContext>,
    pub spec: SpecReconciler,
    pub status: StatusReconciler,
    pub cleanup: NamespaceReconciler,
}

impl Env {
    pub async fn new(config: SyncerConfig) -> Self {
        let up = Side::new(&config.resources, |_| upstream_informer_options(&config)).await;
        let down = Side::new(&config.resources, |gvr| downstream_informer_options(&config, gvr)).await;
        Self::with_sides(config, up, down)
    }

    /// Another syncer sharing this one's clients and caches.
    pub fn peer(&self, config: SyncerConfig) -> Self {
        Self::with_sides_and_remotes(
            config,
            Side { cache: self.up.cache.clone(), senders: self.up.senders.clone() },
            Side { cache: self.down.cache.clone(), senders: self.down.senders.clone() },
            Arc::clone(&self.upstream),
            Arc::clone(&self.downstream),
        )
    }

    fn with_sides(config: SyncerConfig, up: Side, down: Side) -> Self {
        Self::with_sides_and_remotes(config, up, down, FakeRemote::new(), FakeRemote::new())
    }

    fn with_sides_and_remotes(
        config: SyncerConfig,
        up: Side,
        down: Side,
        upstream: Arc<FakeRemote>,
        downstream: Arc<FakeRemote>,
    ) -> Self {
        let upstream_client: Arc<dyn RemoteClient> = upstream.clone();
        let downstream_client: Arc<dyn RemoteClient> = downstream.clone();
        let ctx = Arc::new(SyncContext {
            target: config.target.clone(),
            advanced: config.advanced_scheduling,
            syncer_namespace_prefix: config.syncer_namespace_prefix.clone(),
            resources: config.synced_resources().cloned().collect(),
            upstream: upstream_client,
            downstream: downstream_client,
            upstream_cache: Arc::new(up.cache.clone()),
            downstream_cache: Arc::new(down.cache.clone()),
        });
        let url = Url::parse(&config.upstream_url).unwrap();
        Self {
            spec: SpecReconciler::new(Arc::clone(&ctx), MutatorRegistry::builtin(&url)),
            status: StatusReconciler::new(Arc::clone(&ctx)),
            cleanup: NamespaceReconciler::new(Arc::clone(&ctx)),
            ctx,
            config,
            upstream,
            downstream,
            up,
            down,
        }
    }
}
