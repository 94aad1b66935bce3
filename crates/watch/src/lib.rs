//! The L5 watch/notification subsystem (`spec.md` §4.5): per-key and global diff handlers over a
//! mutable store, plus [`LockManager`], the per-key async mutex a repository takes around a
//! branch-head compare-and-swap.
//!
//! Grounded on two teacher files: `bookmarks::BookmarksSubscription` (`refresh`/`bookmarks` — the
//! "diff-based observation of mutable branch state" shape this crate generalizes past bookmarks
//! to an arbitrary `K`/`V`) and `commitcloudsubscriber` (a standing background subscriber driven
//! by its own task, the same role each [`WatchState`] handler's consumer task plays here).

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

/// An opaque registration handle, returned by [`WatchState::watch`]/[`WatchState::watch_key`] and
/// consumed by [`WatchState::unwatch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// The transition a single key's value went through, observed by a key-scoped handler.
#[derive(Clone, Debug, PartialEq)]
pub enum Diff<V> {
    Added(V),
    Removed(V),
    Updated(V, V),
}

impl<V: Clone + PartialEq> Diff<V> {
    /// `None` if `old == new` (no observable transition) or both are absent.
    fn from_transition(old: Option<V>, new: Option<V>) -> Option<Self> {
        match (old, new) {
            (None, None) => None,
            (None, Some(v)) => Some(Diff::Added(v)),
            (Some(v), None) => Some(Diff::Removed(v)),
            (Some(o), Some(n)) if o == n => None,
            (Some(o), Some(n)) => Some(Diff::Updated(o, n)),
        }
    }
}

/// The same transition, addressed to a global handler, which watches every key at once.
#[derive(Clone, Debug, PartialEq)]
pub enum Event<K, V> {
    Added(K, V),
    Removed(K, V),
    Updated(K, V, V),
}

impl<K: Clone, V> Event<K, V> {
    fn from_diff(key: K, diff: Diff<V>) -> Self {
        match diff {
            Diff::Added(v) => Event::Added(key, v),
            Diff::Removed(v) => Event::Removed(key, v),
            Diff::Updated(o, n) => Event::Updated(key, o, n),
        }
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A registered observer: takes a diff, does something with it, and reports failure rather than
/// panicking. `spec.md` §7: "watchers that raise are logged and dropped" — dropped means *this
/// delivery* is dropped, not the registration; the handler keeps receiving future diffs.
pub type Handler<D> = Arc<dyn Fn(D) -> HandlerFuture + Send + Sync>;

struct Registration<D> {
    id: HandlerId,
    sender: mpsc::UnboundedSender<D>,
    task: JoinHandle<()>,
}

fn spawn_consumer<D: Send + 'static>(handler: Handler<D>) -> (mpsc::UnboundedSender<D>, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::unbounded_channel::<D>();
    let task = tokio::spawn(async move {
        while let Some(diff) = receiver.recv().await {
            if let Err(error) = handler(diff).await {
                tracing::error!(%error, "watch handler failed; dropping this delivery");
            }
        }
    });
    (sender, task)
}

/// Tracks every handler registered against one logical `K -> V` mapping (typically a single
/// `ReadWriteStore`'s key space) and the last value `notify` observed for each key, so a handler
/// registering with a baseline `init` can be caught up immediately.
pub struct WatchState<K, V> {
    current: SyncMutex<HashMap<K, V>>,
    global: SyncMutex<Vec<Registration<Event<K, V>>>>,
    keyed: SyncMutex<HashMap<K, Vec<Registration<Diff<V>>>>>,
    next_id: AtomicU64,
}

impl<K, V> Default for WatchState<K, V> {
    fn default() -> Self {
        WatchState {
            current: SyncMutex::new(HashMap::new()),
            global: SyncMutex::new(Vec::new()),
            keyed: SyncMutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<K, V> WatchState<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Installs a global handler, watching every key. If `init` is given, the handler is caught
    /// up immediately with one diff per key whose current value differs from `init`'s (including
    /// keys present in one map but not the other).
    pub fn watch(&self, init: Option<HashMap<K, V>>, handler: Handler<Event<K, V>>) -> HandlerId {
        let id = self.next_id();
        let (sender, task) = spawn_consumer(handler);

        if let Some(baseline) = init {
            let current = self.current.lock().clone();
            for (key, value) in current.iter() {
                let old = baseline.get(key).cloned();
                if let Some(diff) = Diff::from_transition(old, Some(value.clone())) {
                    let _ = sender.send(Event::from_diff(key.clone(), diff));
                }
            }
            for (key, value) in baseline.into_iter() {
                if !current.contains_key(&key) {
                    if let Some(diff) = Diff::from_transition(Some(value), None) {
                        let _ = sender.send(Event::from_diff(key, diff));
                    }
                }
            }
        }

        self.global.lock().push(Registration { id, sender, task });
        id
    }

    /// Installs a key-scoped handler: more efficient dispatch than a global one when only one key
    /// matters. `init` is the caller's last-known value for `key`; a handler registering with the
    /// key's actual current value as `init` is not caught up at all.
    pub fn watch_key(&self, key: K, init: Option<V>, handler: Handler<Diff<V>>) -> HandlerId {
        let id = self.next_id();
        let (sender, task) = spawn_consumer(handler);

        let current = self.current.lock().get(&key).cloned();
        if let Some(diff) = Diff::from_transition(init, current) {
            let _ = sender.send(diff);
        }

        self.keyed.lock().entry(key).or_default().push(Registration { id, sender, task });
        id
    }

    /// Cancels a handler. Already-enqueued deliveries still run, but this does not return until
    /// they have: dropping the handler's sender lets its consumer task drain the channel and
    /// exit, and this awaits that task's completion.
    pub async fn unwatch(&self, id: HandlerId) {
        let found = {
            let mut global = self.global.lock();
            global.iter().position(|r| r.id == id).map(|pos| global.remove(pos))
        };

        let found = match found {
            Some(registration) => Some(registration),
            None => {
                let mut keyed = self.keyed.lock();
                let mut found = None;
                for entries in keyed.values_mut() {
                    if let Some(pos) = entries.iter().position(|r| r.id == id) {
                        found = Some(entries.remove(pos));
                        break;
                    }
                }
                found
            }
        };

        if let Some(registration) = found {
            drop(registration.sender);
            let _ = registration.task.await;
        }
    }

    /// Called by a backend on every state transition for `key`. Computes the diff against the
    /// last value observed for `key` (or `None`, for a key never seen before), updates that
    /// bookkeeping, and enqueues a delivery for every interested handler. A no-op transition
    /// (`old == new`) enqueues nothing.
    pub fn notify(&self, key: K, new: Option<V>) {
        let old = {
            let mut current = self.current.lock();
            let old = current.get(&key).cloned();
            match &new {
                Some(v) => {
                    current.insert(key.clone(), v.clone());
                }
                None => {
                    current.remove(&key);
                }
            }
            old
        };

        let diff = match Diff::from_transition(old, new) {
            Some(diff) => diff,
            None => return,
        };

        if let Some(entries) = self.keyed.lock().get(&key) {
            for registration in entries {
                let _ = registration.sender.send(diff.clone());
            }
        }

        for registration in self.global.lock().iter() {
            let _ = registration.sender.send(Event::from_diff(key.clone(), diff.clone()));
        }
    }
}

/// Hands out per-key async mutexes, e.g. for a repository to serialize branch-head
/// compare-and-swap attempts against the same branch name while letting unrelated branches
/// proceed concurrently.
pub struct LockManager<K> {
    locks: SyncMutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for LockManager<K> {
    fn default() -> Self {
        LockManager { locks: SyncMutex::new(HashMap::new()) }
    }
}

impl<K: Eq + Hash + Clone> LockManager<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the mutex guarding `key`, creating it on first use. Callers `.lock().await` it
    /// themselves; this only vends the shared handle.
    pub fn lock_for(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        locks.entry(key.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }
}
