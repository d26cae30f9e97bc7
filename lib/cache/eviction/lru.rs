//! Implements the LRU zone shared by the dentry and inode caches.

use std::fmt;
use std::hash::Hash;

use hashlink::LinkedHashMap;
use tracing::{debug, warn};

use crate::sync::Mutex;

/// Callback invoked by [`LruZone::evict_half`] for every candidate, least-recently-used first.
///
/// Implementations must only ever *try* to acquire the entity's own lock: the zone snapshot is
/// taken without holding any entity lock, so blocking here could invert the lock order used by
/// the rest of the cache. Returning `false` leaves the node where it is.
pub trait TryEvict<K, V> {
    /// Attempt to reclaim the node identified by `key`. Returns `true` if the node is gone
    /// (reclaimed now, or already dead), `false` if it is still in use.
    fn try_evict(&self, key: &K, node: &V) -> bool;
}

/// A recency-ordered set of cache nodes.
///
/// The zone only orders nodes. It never owns the entities behind them; `V` is normally a weak
/// handle so that a node which has already been freed can be recognised and dropped during a
/// scan.
pub struct LruZone<K, V> {
    name: &'static str,
    /// Front is least-recently-used, back is most-recently-used.
    ordered: Mutex<LinkedHashMap<K, V>>,
}

impl<K, V> fmt::Debug for LruZone<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruZone")
            .field("name", &self.name)
            .field("len", &self.ordered.lock().len())
            .finish()
    }
}

impl<K: Clone + Eq + Hash, V: Clone> LruZone<K, V> {
    /// Creates an empty zone. `name` only shows up in logs.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            ordered: Mutex::new(LinkedHashMap::new()),
        }
    }

    /// Mark `key` as most-recently-used, registering it if the zone has not seen it yet.
    pub fn use_one(&self, key: K, node: V) {
        let mut ordered = self.ordered.lock();
        ordered.remove(&key);
        ordered.insert(key, node);
    }

    /// Stop tracking `key`. Called when the entity is freed through any path.
    pub fn forget(&self, key: &K) {
        self.ordered.lock().remove(key);
    }

    /// Whether `key` is currently tracked.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.ordered.lock().contains_key(key)
    }

    /// Number of tracked nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered.lock().len()
    }

    /// Whether the zone tracks nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered.lock().is_empty()
    }

    /// Keys from least- to most-recently-used.
    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        self.ordered.lock().keys().cloned().collect()
    }

    /// Scan from the least-recently-used end, asking `evictor` to reclaim each node, until about
    /// half of the population is gone or the list is exhausted.
    ///
    /// The zone lock is only held while taking the snapshot and while unlinking a reclaimed key,
    /// never across a call into `evictor`. Nodes that refuse eviction keep their position.
    ///
    /// Returns the number of nodes reclaimed.
    pub fn evict_half<E: TryEvict<K, V> + ?Sized>(&self, evictor: &E) -> usize {
        let snapshot: Vec<(K, V)> = self
            .ordered
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let target = snapshot.len().div_ceil(2);

        let mut reclaimed = 0;
        for (key, node) in snapshot {
            if reclaimed >= target {
                break;
            }
            if evictor.try_evict(&key, &node) {
                self.ordered.lock().remove(&key);
                reclaimed += 1;
            }
        }

        if reclaimed == 0 && target > 0 {
            warn!(zone = self.name, "eviction pass reclaimed nothing");
        } else {
            debug!(zone = self.name, reclaimed, target, "eviction pass finished");
        }
        reclaimed
    }
}
