//! Directory-entry cache.
//!
//! A single hash table keyed by `(parent, name)` plus the parent/child links stored on each
//! [`Dentry`]. The table owns one `Arc` per cached dentry and is, together with the LRU zone,
//! the only lifetime authority for cold entries.
//!
//! Mutations of the entries below a directory (add, remove, rehash) are only performed while
//! holding that directory's structural lock. Lookups are lock-free table reads. Eviction only
//! try-locks the victim itself, so a hit may name a dentry that is being reclaimed; callers pin
//! hits with `DentryPin::try_new` and treat a failed pin as a miss.

use std::hash::{Hash, Hasher};

use tracing::{debug, trace};

use crate::cache::eviction::lru::{LruZone, TryEvict};
use crate::cache::quota::{Quota, QuotaToken};
use crate::sync::atomic::{AtomicU64, Ordering};
use crate::sync::{Arc, MutexGuard, Weak};

use super::dentry::{Dentry, DentryId, DentryPin};
use super::error::{VfsError, VfsResult};
use super::hstr::HStr;

#[derive(Clone, PartialEq, Eq)]
struct DcacheKey {
    parent: DentryId,
    name: HStr,
}

impl Hash for DcacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Mix the parent in so identical basenames under different directories spread out.
        let mixed = u64::from(self.name.hash_value())
            .wrapping_add(self.parent.0.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        state.write_u64(mixed ^ (mixed >> 29));
    }
}

/// The dentry cache.
pub struct DCache {
    table: scc::HashMap<DcacheKey, Arc<Dentry>>,
    zone: LruZone<DentryId, Weak<Dentry>>,
    quota: Arc<Quota>,
    next_id: AtomicU64,
}

impl DCache {
    /// Creates an empty cache allowing at most `capacity` live dentries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            table: scc::HashMap::new(),
            zone: LruZone::new("dcache"),
            quota: Quota::new(capacity),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate an unhashed dentry named `name`.
    ///
    /// With a parent, the new dentry inherits its superblock and mount and remembers the parent
    /// tentatively so backends can see where it is about to live; it only becomes visible to
    /// lookups through [`DCache::add`]. The reference count starts at zero.
    ///
    /// If the pool is exhausted, one eviction pass runs before a single retry.
    pub fn alloc(&self, parent: Option<&Arc<Dentry>>, name: HStr) -> VfsResult<Arc<Dentry>> {
        let slot = self.grab_slot()?;
        let id = DentryId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let dentry = Arc::new(Dentry::new(id, name, slot));
        if let Some(parent) = parent {
            dentry.set_parent(Some(parent));
            dentry.set_superblock(parent.superblock());
            dentry.set_mount(parent.mount());
        }
        self.zone.use_one(id, Arc::downgrade(&dentry));
        Ok(dentry)
    }

    fn grab_slot(&self) -> VfsResult<QuotaToken> {
        if let Some(slot) = self.quota.try_acquire() {
            return Ok(slot);
        }
        debug!(
            capacity = self.quota.capacity(),
            "dentry pool exhausted, evicting"
        );
        self.evict_half();
        self.quota.try_acquire().ok_or(VfsError::OutOfMemory)
    }

    /// Pure cache query for `name` under `parent`. Never calls a backend.
    ///
    /// `.` and the empty name resolve to `parent`; `..` resolves to its parent, or to `parent`
    /// itself at the top of the tree.
    #[must_use]
    pub fn lookup(&self, parent: &Arc<Dentry>, name: &HStr) -> Option<Arc<Dentry>> {
        if name.is_empty() || name.is_dot() {
            return Some(Arc::clone(parent));
        }
        if name.is_dotdot() {
            return Some(parent.parent().unwrap_or_else(|| Arc::clone(parent)));
        }

        let key = DcacheKey {
            parent: parent.id(),
            name: name.clone(),
        };
        let hit = self.table.read_sync(&key, |_, d| Arc::clone(d));
        if let Some(dentry) = &hit {
            trace!(parent = ?parent.id(), %name, "dcache hit");
            self.touch(dentry);
        }
        hit
    }

    /// Link `dentry` below `parent` and publish it. The cache takes one reference.
    pub fn add(&self, parent: &Arc<Dentry>, dentry: &Arc<Dentry>) {
        dentry.get();
        dentry.set_parent(Some(parent));
        parent.link_child(dentry);
        let key = DcacheKey {
            parent: parent.id(),
            name: dentry.name(),
        };
        self.table.upsert_sync(key, Arc::clone(dentry));
        self.touch(dentry);
    }

    /// [`DCache::add`] a fresh placeholder and hand it back pinned, without a window in which
    /// the eviction scan could reclaim it.
    pub fn add_pinned(&self, parent: &Arc<Dentry>, dentry: Arc<Dentry>) -> DentryPin {
        let _guard = dentry.raw_lock();
        self.add(parent, &dentry);
        DentryPin::new(Arc::clone(&dentry))
    }

    /// Unpublish `dentry`, dropping the cache's reference.
    ///
    /// # Panics
    ///
    /// If anything besides the cache still references the dentry.
    pub fn remove(&self, dentry: &Arc<Dentry>) {
        assert!(
            dentry.try_release_cache_ref(),
            "removing dentry {:?} with ref_count {}",
            dentry.id(),
            dentry.ref_count()
        );
        self.unhash(dentry);
    }

    /// Move `dentry` below `new_parent`, optionally renaming it on the way.
    ///
    /// The caller holds both the old and the new parent's locks for the whole call, so no
    /// lookup observes the entry half-moved.
    pub fn rehash(&self, new_parent: &Arc<Dentry>, dentry: &Arc<Dentry>, new_name: Option<HStr>) {
        self.remove(dentry);
        if let Some(name) = new_name {
            dentry.set_name(name);
        }
        self.add(new_parent, dentry);
    }

    /// Remove `dentry` from the cache and retire it.
    ///
    /// # Panics
    ///
    /// If the dentry has cached children or outstanding references.
    pub fn free(&self, dentry: &Arc<Dentry>) {
        assert!(
            !dentry.has_children(),
            "freeing dentry {:?} with cached children",
            dentry.id()
        );
        self.remove(dentry);
        self.release(dentry);
    }

    /// Retire a dentry that is not (or no longer) hashed: drop its inode link and stop tracking
    /// it. Used directly for placeholders that never made it into the table.
    ///
    /// # Panics
    ///
    /// If the dentry is still referenced.
    pub fn release(&self, dentry: &Arc<Dentry>) {
        assert_eq!(
            dentry.ref_count(),
            0,
            "releasing referenced dentry {:?}",
            dentry.id()
        );
        dentry.clear_inode();
        dentry.set_parent(None);
        dentry.set_mount(None);
        self.zone.forget(&dentry.id());
    }

    fn unhash(&self, dentry: &Arc<Dentry>) {
        if let Some(parent) = dentry.parent() {
            parent.unlink_child(dentry.id());
            let key = DcacheKey {
                parent: parent.id(),
                name: dentry.name(),
            };
            drop(
                self.table
                    .remove_if_sync(&key, |cached| Arc::ptr_eq(&*cached, dentry)),
            );
        }
        dentry.set_parent(None);
    }

    /// Record a use of `dentry` with the LRU zone.
    pub fn touch(&self, dentry: &Arc<Dentry>) {
        self.zone.use_one(dentry.id(), Arc::downgrade(dentry));
    }

    /// Take `dentry`'s structural lock, recording the use.
    pub fn lock<'a>(&self, dentry: &'a Arc<Dentry>) -> MutexGuard<'a, ()> {
        let guard = dentry.raw_lock();
        self.touch(dentry);
        guard
    }

    /// Run one eviction pass over the zone. Returns the number of dentries reclaimed.
    pub fn evict_half(&self) -> usize {
        self.zone.evict_half(self)
    }

    /// Reclaim every cold cached descendant of `dentry`. The caller holds `dentry`'s lock.
    /// Returns `true` if no cached children remain.
    pub(crate) fn prune_children(&self, dentry: &Arc<Dentry>) -> bool {
        for child in dentry.children() {
            self.try_reclaim(&child);
        }
        !dentry.has_children()
    }

    /// Reclaim `dentry` and its cold subtree if the cache holds the only reference to each.
    fn try_reclaim(&self, dentry: &Arc<Dentry>) -> bool {
        let Some(_guard) = dentry.try_raw_lock() else {
            return false;
        };
        if dentry.is_mount_root() || !self.prune_children(dentry) {
            return false;
        }
        if !dentry.try_release_cache_ref() {
            return false;
        }
        trace!(dentry = ?dentry.id(), "reclaiming dentry");
        self.unhash(dentry);
        self.release(dentry);
        true
    }

    /// Number of hashed dentries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether nothing is hashed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The recency zone.
    #[must_use]
    pub fn zone(&self) -> &LruZone<DentryId, Weak<Dentry>> {
        &self.zone
    }

    /// The dentry pool.
    #[must_use]
    pub fn quota(&self) -> &Arc<Quota> {
        &self.quota
    }
}

impl TryEvict<DentryId, Weak<Dentry>> for DCache {
    fn try_evict(&self, _id: &DentryId, node: &Weak<Dentry>) -> bool {
        let Some(dentry) = node.upgrade() else {
            return true;
        };
        // Parentless dentries are the root or already retired; neither belongs to the scan.
        if dentry.parent().is_none() {
            return dentry.ref_count() == 0 && !dentry.has_children();
        }
        self.try_reclaim(&dentry)
    }
}
