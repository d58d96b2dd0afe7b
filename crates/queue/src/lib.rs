//! Tandem work queue: deduplicating, rate-limited queue with a worker pool.
//!
//! Semantics per key:
//! - a key already waiting in the queue is coalesced with later adds;
//! - a key re-added while a worker holds it is parked and handed out again
//!   once that worker calls [`WorkQueue::done`];
//! - failures are retried with per-key exponential back-off until a
//!   success calls [`WorkQueue::forget`].

#![forbid(unsafe_code)]

mod worker;

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use metrics::{counter, gauge};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::Notify;

pub use worker::{process_next_work_item, run_workers, Reconciler};

/// Per-key exponential back-off: `base * 2^failures`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { base: Duration::from_millis(5), max: Duration::from_secs(1000) }
    }
}

impl Backoff {
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

struct State<K> {
    queue: VecDeque<K>,
    /// Keys that need processing (queued, or parked behind an in-flight run).
    dirty: FxHashSet<K>,
    processing: FxHashSet<K>,
    failures: FxHashMap<K, u32>,
    shutting_down: bool,
}

pub struct WorkQueue<K> {
    name: &'static str,
    backoff: Backoff,
    state: Mutex<State<K>>,
    notify: Notify,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new(name: &'static str, backoff: Backoff) -> Self {
        Self {
            name,
            backoff,
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: FxHashSet::default(),
                processing: FxHashSet::default(),
                failures: FxHashMap::default(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn lock(&self) -> MutexGuard<'_, State<K>> {
        // State stays consistent across a panicking holder: every mutation is a single step.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, key: K) {
        let mut st = self.lock();
        if st.shutting_down || st.dirty.contains(&key) {
            return;
        }
        st.dirty.insert(key.clone());
        counter!("queue_adds_total", 1u64, "queue" => self.name);
        if st.processing.contains(&key) {
            return;
        }
        st.queue.push_back(key);
        gauge!("queue_depth", st.queue.len() as f64, "queue" => self.name);
        drop(st);
        self.notify.notify_one();
    }

    /// Wait for the next key. `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            {
                let mut st = self.lock();
                if st.shutting_down {
                    return None;
                }
                if let Some(key) = st.queue.pop_front() {
                    st.dirty.remove(&key);
                    st.processing.insert(key.clone());
                    gauge!("queue_depth", st.queue.len() as f64, "queue" => self.name);
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Release a key handed out by [`Self::get`]; requeues it if it was re-added meanwhile.
    pub fn done(&self, key: &K) {
        let mut st = self.lock();
        st.processing.remove(key);
        if st.dirty.contains(key) && !st.shutting_down {
            st.queue.push_back(key.clone());
            drop(st);
            self.notify.notify_one();
        }
    }

    /// Reset the failure count of a key.
    pub fn forget(&self, key: &K) {
        self.lock().failures.remove(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Re-add after the key's current back-off delay, bumping its failure count.
    pub fn add_rate_limited(self: &Arc<Self>, key: K) {
        let delay = {
            let mut st = self.lock();
            let failures = st.failures.entry(key.clone()).or_insert(0);
            let delay = self.backoff.delay(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        counter!("queue_retries_total", 1u64, "queue" => self.name);
        self.add_after(key, delay);
    }

    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        if self.is_shutting_down() {
            return;
        }
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(queue) = weak.upgrade() {
                queue.add(key);
            }
        });
    }

    /// Stop handing out keys and refuse new ones; waiting workers wake up with `None`.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
