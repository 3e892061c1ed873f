use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::key::{QueryKey, QueryValue};
use super::state::{QueryResult, QueryStatus};
use crate::actor::ActorHandle;
use crate::error::{AppError, AppResult};
use crate::identity::SessionManager;

type SharedFetch = Shared<BoxFuture<'static, AppResult<QueryValue>>>;

struct Entry {
    status: QueryStatus,
    value: Option<QueryValue>,
    error: Option<AppError>,
    updated_at: Option<DateTime<Utc>>,
    stale: bool,
    generation: u64,
    /// Most recently issued request; only its reply may be stored.
    in_flight: Option<(u64, SharedFetch)>,
    observers: usize,
    idle_since: Option<Instant>,
    tx: watch::Sender<QueryResult<QueryValue>>,
}

impl Entry {
    fn new(generation: u64) -> Self {
        let (tx, _) = watch::channel(QueryResult { status: QueryStatus::Idle, ..QueryResult::not_ready() });
        Self {
            status: QueryStatus::Idle,
            value: None,
            error: None,
            updated_at: None,
            stale: false,
            generation,
            in_flight: None,
            observers: 0,
            idle_since: Some(Instant::now()),
            tx,
        }
    }

    fn snapshot(&self) -> QueryResult<QueryValue> {
        QueryResult {
            status: self.status,
            value: self.value.clone(),
            error: self.error.clone(),
            updated_at: self.updated_at,
            stale: self.stale,
        }
    }

    fn publish(&self) { self.tx.send_replace(self.snapshot()); }

    fn is_settled(&self) -> bool { matches!(self.status, QueryStatus::Success | QueryStatus::Error) }

    /// Forget everything fetched under an older identity.
    fn reset(&mut self, generation: u64) {
        self.status = QueryStatus::Idle;
        self.value = None;
        self.error = None;
        self.updated_at = None;
        self.stale = false;
        self.in_flight = None;
        self.generation = generation;
        self.publish();
    }
}

struct Inner {
    session: Arc<SessionManager>,
    entries: Mutex<HashMap<QueryKey, Entry>>,
    seq: AtomicU64,
    gc_time: Duration,
}

/// Keyed cache of remote reads. Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<Inner>,
}

impl QueryClient {
    pub fn new(session: Arc<SessionManager>, gc_time: Duration) -> Self {
        Self {
            inner: Arc::new(Inner { session, entries: Mutex::new(HashMap::new()), seq: AtomicU64::new(0), gc_time }),
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> { &self.inner.session }

    /// Read `key`: cached value when fresh, otherwise join the in-flight
    /// request or issue a new one. Never calls the remote while not ready.
    pub async fn fetch(&self, key: &QueryKey) -> QueryResult<QueryValue> {
        let (accessor, generation) = self.inner.session.accessor();
        let Some(actor) = accessor.ready_actor().cloned() else {
            self.mark_not_ready(key, generation);
            debug!(target: "academic_chain::cache", "query.not_ready key={}", key);
            return QueryResult::not_ready();
        };

        let (seq, fut) = {
            let mut entries = self.inner.entries.lock();
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry::new(generation));
            if entry.generation != generation {
                entry.reset(generation);
            }
            match self.pending_or_issue(entry, key, &actor) {
                Some(p) => p,
                None => return entry.snapshot(),
            }
        };
        let result = fut.await;
        self.settle(key, seq, generation, result)
    }

    fn pending_or_issue(&self, entry: &mut Entry, key: &QueryKey, actor: &ActorHandle) -> Option<(u64, SharedFetch)> {
        if !entry.stale {
            if let Some((seq, fut)) = &entry.in_flight {
                return Some((*seq, fut.clone()));
            }
            if entry.is_settled() {
                return None;
            }
        }
        Some(self.issue(entry, key, actor))
    }

    fn issue(&self, entry: &mut Entry, key: &QueryKey, actor: &ActorHandle) -> (u64, SharedFetch) {
        let seq = self.inner.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let k = key.clone();
        let actor = actor.clone();
        let fut: SharedFetch = async move { k.run(&actor).await }.boxed().shared();
        entry.in_flight = Some((seq, fut.clone()));
        entry.stale = false;
        entry.status = QueryStatus::Pending;
        entry.publish();
        debug!(target: "academic_chain::cache", "query.issue key={} seq={}", key, seq);
        (seq, fut)
    }

    fn settle(&self, key: &QueryKey, seq: u64, generation: u64, result: AppResult<QueryValue>) -> QueryResult<QueryValue> {
        let current_generation = self.inner.session.generation();
        let mut entries = self.inner.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return QueryResult::not_ready();
        };
        let latest = matches!(&entry.in_flight, Some((s, _)) if *s == seq);
        if !latest || entry.generation != generation || current_generation != generation {
            debug!(target: "academic_chain::cache", "query.discard key={} seq={} generation={}", key, seq, generation);
            if current_generation != generation {
                return QueryResult::not_ready();
            }
            return entry.snapshot();
        }
        entry.in_flight = None;
        match result {
            Ok(v) => {
                entry.value = Some(v);
                entry.error = None;
                entry.status = QueryStatus::Success;
            }
            Err(e) => {
                warn!(target: "academic_chain::cache", "query.error key={} {}", key, e);
                entry.error = Some(e);
                entry.status = QueryStatus::Error;
            }
        }
        entry.updated_at = Some(Utc::now());
        entry.publish();
        entry.snapshot()
    }

    /// Let a spawned task await and store a reply nobody else is awaiting.
    fn drive(&self, key: QueryKey, seq: u64, generation: u64, fut: SharedFetch) {
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let client = self.clone();
                rt.spawn(async move {
                    let result = fut.await;
                    client.settle(&key, seq, generation, result);
                });
            }
            Err(_) => {
                // the next read of this key joins the request and stores it
                debug!(target: "academic_chain::cache", "query.drive deferred key={}: no async runtime", key);
            }
        }
    }

    fn mark_not_ready(&self, key: &QueryKey, generation: u64) {
        let mut entries = self.inner.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            if entry.generation != generation {
                entry.reset(generation);
            }
            if entry.status == QueryStatus::Idle {
                entry.status = QueryStatus::NotReady;
                entry.publish();
            }
        }
    }

    /// Register interest in `key`. While at least one observer exists the key
    /// refetches as soon as it is invalidated or readiness changes.
    pub fn observe(&self, key: QueryKey) -> QueryObserver {
        let (accessor, generation) = self.inner.session.accessor();
        let actor = accessor.ready_actor().cloned();
        let (rx, pending) = {
            let mut entries = self.inner.entries.lock();
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry::new(generation));
            if entry.generation != generation {
                entry.reset(generation);
            }
            entry.observers += 1;
            entry.idle_since = None;
            let pending = match &actor {
                Some(actor) => self.pending_or_issue(entry, &key, actor),
                None => {
                    if entry.status == QueryStatus::Idle {
                        entry.status = QueryStatus::NotReady;
                        entry.publish();
                    }
                    None
                }
            };
            (entry.tx.subscribe(), pending)
        };
        if let Some((seq, fut)) = pending {
            self.drive(key.clone(), seq, generation, fut);
        }
        QueryObserver { client: self.clone(), key, rx }
    }

    fn release(&self, key: &QueryKey) {
        let mut entries = self.inner.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.observers = entry.observers.saturating_sub(1);
            if entry.observers == 0 {
                entry.idle_since = Some(Instant::now());
            }
        }
    }

    /// Mark `keys` stale. Observed keys get a fresh request right away;
    /// the rest refetch on their next read. Returns the keys refetched now.
    pub fn invalidate(&self, keys: &[QueryKey]) -> Vec<QueryKey> {
        let (accessor, generation) = self.inner.session.accessor();
        let actor = accessor.ready_actor().cloned();
        let mut issued = Vec::new();
        {
            let mut entries = self.inner.entries.lock();
            for key in keys {
                let Some(entry) = entries.get_mut(key) else { continue };
                if entry.generation != generation {
                    entry.reset(generation);
                    continue;
                }
                entry.stale = true;
                entry.publish();
                if entry.observers > 0 {
                    if let Some(actor) = &actor {
                        let (seq, fut) = self.issue(entry, key, actor);
                        issued.push((key.clone(), seq, fut));
                    }
                }
            }
        }
        debug!(target: "academic_chain::cache", "query.invalidate keys={} refetching={}", keys.len(), issued.len());
        let mut refetched = Vec::with_capacity(issued.len());
        for (key, seq, fut) in issued {
            refetched.push(key.clone());
            self.drive(key, seq, generation, fut);
        }
        refetched
    }

    /// Re-derive every entry after an identity change: drop data from older
    /// generations and refetch observed keys through the new handle.
    pub fn on_session_changed(&self) {
        let (accessor, generation) = self.inner.session.accessor();
        let actor = accessor.ready_actor().cloned();
        let mut issued = Vec::new();
        {
            let mut entries = self.inner.entries.lock();
            for (key, entry) in entries.iter_mut() {
                if entry.generation != generation {
                    entry.reset(generation);
                }
                match &actor {
                    None => {
                        if !entry.is_settled() {
                            entry.status = QueryStatus::NotReady;
                            entry.publish();
                        }
                    }
                    Some(actor) if entry.observers > 0 => {
                        if let Some((seq, fut)) = self.pending_or_issue(entry, key, actor) {
                            issued.push((key.clone(), seq, fut));
                        }
                    }
                    Some(_) => {}
                }
            }
        }
        for (key, seq, fut) in issued {
            self.drive(key, seq, generation, fut);
        }
    }

    pub fn peek(&self, key: &QueryKey) -> Option<QueryResult<QueryValue>> {
        self.inner.entries.lock().get(key).map(|e| e.snapshot())
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.inner.entries.lock().get(key).map(|e| e.stale).unwrap_or(false)
    }

    pub fn observer_count(&self, key: &QueryKey) -> usize {
        self.inner.entries.lock().get(key).map(|e| e.observers).unwrap_or(0)
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self.inner.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize { self.inner.entries.lock().len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Remove entries nobody has observed for `gc_time`. In-flight entries stay.
    pub fn collect_garbage(&self) -> usize { self.collect_garbage_at(Instant::now()) }

    pub fn collect_garbage_at(&self, now: Instant) -> usize {
        let gc_time = self.inner.gc_time;
        let mut entries = self.inner.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| {
            let expired = e.observers == 0
                && e.in_flight.is_none()
                && e.idle_since.map(|t| now.saturating_duration_since(t) >= gc_time).unwrap_or(false);
            !expired
        });
        let removed = before - entries.len();
        if removed > 0 {
            debug!(target: "academic_chain::cache", "cache.gc removed={}", removed);
        }
        removed
    }

    /// Drop every entry. Observers see their channel close.
    pub fn clear(&self) {
        self.inner.entries.lock().clear();
    }
}

/// Interest in one key. Dropping it releases the observation.
pub struct QueryObserver {
    client: QueryClient,
    key: QueryKey,
    rx: watch::Receiver<QueryResult<QueryValue>>,
}

impl QueryObserver {
    pub fn key(&self) -> &QueryKey { &self.key }

    pub fn current(&self) -> QueryResult<QueryValue> { self.rx.borrow().clone() }

    /// Wait for the next published state. False once the entry is gone.
    pub async fn changed(&mut self) -> bool { self.rx.changed().await.is_ok() }

    /// Wait until the key holds a reply that is not about to be replaced,
    /// or readiness is off.
    pub async fn settled(&mut self) -> QueryResult<QueryValue> {
        loop {
            let cur = self.rx.borrow_and_update().clone();
            let done = match cur.status {
                QueryStatus::NotReady => true,
                QueryStatus::Success | QueryStatus::Error => !cur.stale,
                QueryStatus::Idle | QueryStatus::Pending => false,
            };
            if done || !self.changed().await {
                return cur;
            }
        }
    }
}

impl Drop for QueryObserver {
    fn drop(&mut self) { self.client.release(&self.key); }
}
