use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::core::DynamicObject;
use kube::{Client, Config};
use metrics::{counter, histogram};
use rustc_hash::FxHashMap;
use tandem_core::{ClientError, Object, ObjectRef, RemoteClient};
use tracing::debug;

use crate::config::cluster_config;
use crate::discovery::ResourceResolver;
use crate::error::classify;
use crate::{dynamic_from, object_from};

/// How a server exposes tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterScope {
    /// A plain cluster; `ObjectRef::cluster` is ignored.
    Single,
    /// Each logical cluster lives under `/clusters/<name>`.
    PerCluster,
}

/// [`RemoteClient`] over `Api<DynamicObject>`.
pub struct KubeRemote {
    side: &'static str,
    base: Config,
    scope: ClusterScope,
    default_client: Client,
    resolver: Arc<ResourceResolver>,
    clients: Mutex<FxHashMap<String, Client>>,
}

impl KubeRemote {
    /// `side` names this end in logs and metrics ("upstream", "downstream").
    pub fn new(side: &'static str, base: Config, scope: ClusterScope) -> Result<Self> {
        let default_client = Client::try_from(base.clone()).with_context(|| format!("building {side} client"))?;
        let resolver = Arc::new(ResourceResolver::new(default_client.clone()));
        Ok(Self { side, base, scope, default_client, resolver, clients: Mutex::new(FxHashMap::default()) })
    }

    pub fn side(&self) -> &'static str {
        self.side
    }

    pub fn resolver(&self) -> Arc<ResourceResolver> {
        Arc::clone(&self.resolver)
    }

    /// Client for one logical cluster; `"*"` addresses all of them at once (watches).
    pub fn client_for(&self, cluster: Option<&str>) -> Result<Client, ClientError> {
        let cluster = match (self.scope, cluster) {
            (ClusterScope::PerCluster, Some(c)) if !c.is_empty() => c,
            _ => return Ok(self.default_client.clone()),
        };
        let mut clients = self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(c) = clients.get(cluster) {
            return Ok(c.clone());
        }
        let cfg = cluster_config(&self.base, cluster).map_err(|e| ClientError::Transport(format!("{e:#}")))?;
        let client = Client::try_from(cfg).map_err(classify)?;
        debug!(side = self.side, cluster, "built logical cluster client");
        clients.insert(cluster.to_string(), client.clone());
        Ok(client)
    }

    /// Client used to list and watch every tenant's objects.
    pub fn watch_client(&self) -> Result<Client, ClientError> {
        match self.scope {
            ClusterScope::Single => Ok(self.default_client.clone()),
            ClusterScope::PerCluster => self.client_for(Some("*")),
        }
    }

    async fn api_for(&self, target: &ObjectRef) -> Result<Api<DynamicObject>, ClientError> {
        let resolved = self.resolver.resolve(&target.resource).await?;
        let client = self.client_for(target.cluster.as_deref())?;
        Ok(match (resolved.namespaced, target.namespace.as_deref()) {
            (true, Some(ns)) => Api::namespaced_with(client, ns, &resolved.api),
            _ => Api::all_with(client, &resolved.api),
        })
    }

    fn record<T>(&self, op: &'static str, started: Instant, res: &Result<T, ClientError>) {
        histogram!("remote_call_ms", started.elapsed().as_secs_f64() * 1000.0, "side" => self.side, "op" => op);
        if res.is_err() {
            counter!("remote_call_errors_total", 1u64, "side" => self.side, "op" => op);
        }
    }

    fn decode(&self, target: &ObjectRef, obj: DynamicObject) -> Result<Object, ClientError> {
        object_from(&obj, target.cluster.as_deref())
    }
}

#[async_trait::async_trait]
impl RemoteClient for KubeRemote {
    async fn get(&self, target: &ObjectRef) -> Result<Object, ClientError> {
        let started = Instant::now();
        let api = self.api_for(target).await?;
        let res = match api.get(&target.name).await {
            Ok(o) => self.decode(target, o),
            Err(e) => Err(classify(e)),
        };
        self.record("get", started, &res);
        res
    }

    async fn create(&self, target: &ObjectRef, obj: &Object) -> Result<Object, ClientError> {
        let started = Instant::now();
        let api = self.api_for(target).await?;
        let body = dynamic_from(obj)?;
        let res = match api.create(&PostParams::default(), &body).await {
            Ok(o) => self.decode(target, o),
            Err(e) => Err(classify(e)),
        };
        self.record("create", started, &res);
        res
    }

    async fn update(&self, target: &ObjectRef, obj: &Object) -> Result<Object, ClientError> {
        let started = Instant::now();
        let api = self.api_for(target).await?;
        let body = dynamic_from(obj)?;
        let res = match api.replace(&target.name, &PostParams::default(), &body).await {
            Ok(o) => self.decode(target, o),
            Err(e) => Err(classify(e)),
        };
        self.record("update", started, &res);
        res
    }

    async fn update_status(&self, target: &ObjectRef, obj: &Object) -> Result<Object, ClientError> {
        let started = Instant::now();
        let api = self.api_for(target).await?;
        let body = serde_json::to_vec(obj).map_err(|e| ClientError::Transport(format!("encode object: {e}")))?;
        let res = match api.replace_status(&target.name, &PostParams::default(), body).await {
            Ok(o) => self.decode(target, o),
            Err(e) => Err(classify(e)),
        };
        self.record("update_status", started, &res);
        res
    }

    async fn delete(&self, target: &ObjectRef) -> Result<(), ClientError> {
        let started = Instant::now();
        let api = self.api_for(target).await?;
        let res = api.delete(&target.name, &DeleteParams::default()).await.map(|_| ()).map_err(classify);
        self.record("delete", started, &res);
        res
    }

    async fn apply(&self, target: &ObjectRef, obj: &Object, field_manager: &str, force: bool) -> Result<Object, ClientError> {
        let started = Instant::now();
        let api = self.api_for(target).await?;
        let mut pp = PatchParams::apply(field_manager);
        if force {
            pp = pp.force();
        }
        let res = match api.patch(&target.name, &pp, &Patch::Apply(obj.to_value())).await {
            Ok(o) => self.decode(target, o),
            Err(e) => Err(classify(e)),
        };
        self.record("apply", started, &res);
        res
    }
}
