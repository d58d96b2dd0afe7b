//! Tandem store: per-resource informer caches fed by watch deltas.
//!
//! Deltas go through a [`Coalescer`] keyed by cache key, are folded into a
//! [`StoreBuilder`] on a short tick, and published as an immutable
//! [`Snapshot`] behind an `ArcSwap`. Registered [`EventHandler`]s are told
//! about each change only after the snapshot carrying it is visible, so a
//! handler that enqueues work never races ahead of the cache.

#![forbid(unsafe_code)]

mod cache;
mod index;

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use metrics::{gauge, histogram};
use rustc_hash::{FxHashMap, FxHashSet};
use tandem_core::{Delta, EventHandler, Object, ResourceType};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

pub use cache::InformerCache;
pub use index::{
    by_cluster_namespace, by_namespace, cluster_aware_key, namespace_key, IndexFn, IndexValues, KeyFn,
    CLUSTER_NAMESPACE_INDEX, NAMESPACE_INDEX,
};

/// One observed change, after it has been folded into the store.
#[derive(Debug, Clone)]
pub enum Notification {
    Added { key: String, obj: Arc<Object> },
    Updated { key: String, old: Arc<Object>, new: Arc<Object> },
    Deleted { key: String, obj: Arc<Object> },
}

/// Pending deltas for one tick, deduplicated per key.
///
/// A relist supersedes everything queued before it. Nothing is dropped:
/// a cache that loses a delete would keep reconciling a ghost.
pub struct Coalescer {
    key_fn: KeyFn,
    map: FxHashMap<String, Delta>,
    order: VecDeque<String>,
    relist: Option<Vec<Object>>,
}

/// What [`Coalescer::drain_ready`] hands to the builder.
#[derive(Debug, Default)]
pub struct Batch {
    pub relist: Option<Vec<Object>>,
    pub deltas: Vec<Delta>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.relist.is_none() && self.deltas.is_empty()
    }
}

impl Coalescer {
    pub fn new(key_fn: KeyFn) -> Self {
        Self { key_fn, map: FxHashMap::default(), order: VecDeque::new(), relist: None }
    }

    pub fn len(&self) -> usize {
        self.map.len() + usize::from(self.relist.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, d: Delta) {
        let key = match &d {
            Delta::Applied(o) | Delta::Deleted(o) => (self.key_fn)(o),
            Delta::Replaced(items) => {
                self.map.clear();
                self.order.clear();
                self.relist = Some(items.clone());
                return;
            }
        };
        if !self.map.contains_key(&key) {
            self.order.push_back(key.clone());
        }
        self.map.insert(key, d);
    }

    pub fn drain_ready(&mut self) -> Batch {
        let mut deltas = Vec::with_capacity(self.order.len());
        while let Some(key) = self.order.pop_front() {
            if let Some(d) = self.map.remove(&key) {
                deltas.push(d);
            }
        }
        Batch { relist: self.relist.take(), deltas }
    }
}

/// Immutable view of one informer's contents at an epoch.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub epoch: u64,
    items: FxHashMap<String, Arc<Object>>,
    indices: FxHashMap<String, FxHashMap<String, FxHashSet<String>>>,
}

impl Snapshot {
    pub fn get(&self, key: &str) -> Option<Arc<Object>> {
        self.items.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    pub fn list(&self) -> Vec<Arc<Object>> {
        self.items.values().cloned().collect()
    }

    /// Objects whose `index` function yielded `value`; `None` for an unknown index.
    pub fn by_index(&self, index: &str, value: &str) -> Option<Vec<Arc<Object>>> {
        let idx = self.indices.get(index)?;
        let keys = match idx.get(value) {
            Some(keys) => keys,
            None => return Some(Vec::new()),
        };
        let mut out: Vec<Arc<Object>> = keys.iter().filter_map(|k| self.items.get(k).cloned()).collect();
        out.sort_by(|a, b| a.name().cmp(b.name()));
        Some(out)
    }
}

/// Folds batches into keyed, indexed state and reports what changed.
pub struct StoreBuilder {
    epoch: u64,
    key_fn: KeyFn,
    indexers: Vec<(String, IndexFn)>,
    items: FxHashMap<String, Arc<Object>>,
    indices: FxHashMap<String, FxHashMap<String, FxHashSet<String>>>,
    relisted: bool,
}

impl StoreBuilder {
    pub fn new(key_fn: KeyFn, indexers: Vec<(String, IndexFn)>) -> Self {
        let indices = indexers.iter().map(|(name, _)| (name.clone(), FxHashMap::default())).collect();
        Self { epoch: 0, key_fn, indexers, items: FxHashMap::default(), indices, relisted: false }
    }

    /// True once a full list has been applied.
    pub fn has_synced(&self) -> bool {
        self.relisted
    }

    pub fn apply(&mut self, batch: Batch) -> Vec<Notification> {
        let mut out = Vec::new();
        if let Some(list) = batch.relist {
            self.replace(list, &mut out);
        }
        for d in batch.deltas {
            match d {
                Delta::Applied(obj) => self.upsert(obj, &mut out),
                Delta::Deleted(obj) => {
                    let key = (self.key_fn)(&obj);
                    if let Some(old) = self.remove(&key) {
                        out.push(Notification::Deleted { key, obj: old });
                    }
                }
                Delta::Replaced(list) => self.replace(list, &mut out),
            }
        }
        self.epoch = self.epoch.saturating_add(1);
        out
    }

    pub fn freeze(&self) -> Arc<Snapshot> {
        Arc::new(Snapshot { epoch: self.epoch, items: self.items.clone(), indices: self.indices.clone() })
    }

    fn replace(&mut self, list: Vec<Object>, out: &mut Vec<Notification>) {
        let mut seen = FxHashSet::default();
        for obj in list {
            seen.insert((self.key_fn)(&obj));
            self.upsert(obj, out);
        }
        let gone: Vec<String> = self.items.keys().filter(|k| !seen.contains(*k)).cloned().collect();
        for key in gone {
            if let Some(old) = self.remove(&key) {
                out.push(Notification::Deleted { key, obj: old });
            }
        }
        self.relisted = true;
    }

    fn upsert(&mut self, obj: Object, out: &mut Vec<Notification>) {
        let key = (self.key_fn)(&obj);
        let new = Arc::new(obj);
        match self.remove(&key) {
            Some(old) => {
                self.insert(key.clone(), Arc::clone(&new));
                out.push(Notification::Updated { key, old, new });
            }
            None => {
                self.insert(key.clone(), Arc::clone(&new));
                out.push(Notification::Added { key, obj: new });
            }
        }
    }

    fn insert(&mut self, key: String, obj: Arc<Object>) {
        for (name, f) in &self.indexers {
            let idx = self.indices.entry(name.clone()).or_default();
            for v in f(&obj) {
                idx.entry(v).or_default().insert(key.clone());
            }
        }
        self.items.insert(key, obj);
    }

    fn remove(&mut self, key: &str) -> Option<Arc<Object>> {
        let old = self.items.remove(key)?;
        for (name, f) in &self.indexers {
            if let Some(idx) = self.indices.get_mut(name) {
                for v in f(&old) {
                    if let Some(keys) = idx.get_mut(&v) {
                        keys.remove(key);
                        if keys.is_empty() {
                            idx.remove(&v);
                        }
                    }
                }
            }
        }
        Some(old)
    }
}

/// How one informer keys, indexes and resyncs its objects.
#[derive(Clone)]
pub struct InformerOptions {
    pub key_fn: KeyFn,
    pub indexers: Vec<(String, IndexFn)>,
    /// Re-deliver every object as an update on this period.
    pub resync: Option<Duration>,
    /// Delta channel capacity.
    pub cap: usize,
}

impl InformerOptions {
    pub fn new(key_fn: KeyFn) -> Self {
        let cap = std::env::var("TANDEM_QUEUE_CAP").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(2048);
        Self { key_fn, indexers: Vec::new(), resync: None, cap }
    }

    pub fn with_index(mut self, name: &str, f: IndexFn) -> Self {
        self.indexers.push((name.to_string(), f));
        self
    }

    pub fn with_resync(mut self, period: Option<Duration>) -> Self {
        self.resync = period.filter(|p| !p.is_zero());
        self
    }
}

type Handlers = Arc<RwLock<Vec<Arc<dyn EventHandler>>>>;

/// Handle for readers: current snapshot, epoch/sync subscriptions, handler registration.
#[derive(Clone)]
pub struct Informer {
    resource: ResourceType,
    snap: Arc<ArcSwap<Snapshot>>,
    epoch_rx: watch::Receiver<u64>,
    synced_rx: watch::Receiver<bool>,
    handlers: Handlers,
}

impl Informer {
    pub fn resource(&self) -> &ResourceType {
        &self.resource
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.snap.load_full()
    }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.epoch_rx.clone()
    }

    pub fn has_synced(&self) -> bool {
        *self.synced_rx.borrow()
    }

    /// Resolve once the first full list has been published. Returns `false`
    /// if the ingest loop stopped before that happened.
    pub async fn wait_for_sync(&self) -> bool {
        let mut rx = self.synced_rx.clone();
        let synced = rx.wait_for(|synced| *synced).await.is_ok();
        synced
    }

    /// Register a handler. Objects already in the cache are replayed to it as adds.
    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let snap = self.current();
        for (key, obj) in &snap.items {
            handler.on_add(key, obj);
        }
        handlers.push(handler);
    }
}

fn dispatch(handlers: &Handlers, events: &[Notification]) {
    if events.is_empty() {
        return;
    }
    let handlers = handlers.read().unwrap_or_else(|poisoned| poisoned.into_inner());
    for h in handlers.iter() {
        for ev in events {
            match ev {
                Notification::Added { key, obj } => h.on_add(key, obj),
                Notification::Updated { key, old, new } => h.on_update(key, old, new),
                Notification::Deleted { key, obj } => h.on_delete(key, obj),
            }
        }
    }
}

fn resync(handlers: &Handlers, snap: &Snapshot) {
    let handlers = handlers.read().unwrap_or_else(|poisoned| poisoned.into_inner());
    for h in handlers.iter() {
        for (key, obj) in &snap.items {
            h.on_update(key, obj, obj);
        }
    }
}

/// Spawn an ingest loop consuming deltas for one resource type. Returns a sender
/// for deltas and a handle for reads. The loop ends when every sender is dropped.
pub fn spawn_ingest(resource: ResourceType, opts: InformerOptions) -> (mpsc::Sender<Delta>, Informer) {
    let (tx, mut rx) = mpsc::channel::<Delta>(opts.cap.max(1));
    let snap = Arc::new(ArcSwap::from_pointee(Snapshot::default()));
    let (epoch_tx, epoch_rx) = watch::channel(0u64);
    let (synced_tx, synced_rx) = watch::channel(false);
    let handlers: Handlers = Arc::new(RwLock::new(Vec::new()));

    let informer = Informer { resource: resource.clone(), snap: Arc::clone(&snap), epoch_rx, synced_rx, handlers: Arc::clone(&handlers) };
    let gvr = resource.to_string();

    tokio::spawn(async move {
        let mut coalescer = Coalescer::new(opts.key_fn);
        let mut builder = StoreBuilder::new(opts.key_fn, opts.indexers);
        let mut ticker = tokio::time::interval(Duration::from_millis(8));
        let resync_period = opts.resync.unwrap_or(Duration::from_secs(24 * 3600));
        let mut resync_ticker = tokio::time::interval_at(tokio::time::Instant::now() + resync_period, resync_period);
        let publish = |builder: &mut StoreBuilder, coalescer: &mut Coalescer| {
            let batch = coalescer.drain_ready();
            if batch.is_empty() {
                return;
            }
            let started = Instant::now();
            let events = builder.apply(batch);
            let next = builder.freeze();
            let epoch = next.epoch;
            gauge!("store_items", next.len() as f64, "gvr" => gvr.clone());
            snap.store(next);
            let _ = epoch_tx.send(epoch);
            if builder.has_synced() && !*synced_tx.borrow() {
                debug!(gvr = %gvr, "informer synced");
                let _ = synced_tx.send(true);
            }
            dispatch(&handlers, &events);
            histogram!("store_apply_ms", started.elapsed().as_secs_f64() * 1000.0, "gvr" => gvr.clone());
        };
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        Some(d) => coalescer.push(d),
                        None => {
                            debug!(gvr = %gvr, "delta channel closed; draining and exiting ingest loop");
                            publish(&mut builder, &mut coalescer);
                            break;
                        }
                    }
                }
                _ = ticker.tick() => publish(&mut builder, &mut coalescer),
                _ = resync_ticker.tick(), if opts.resync.is_some() => {
                    resync(&handlers, &snap.load());
                }
            }
        }
        info!(gvr = %gvr, "ingest loop stopped");
    });

    (tx, informer)
}
