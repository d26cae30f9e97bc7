//! Inodes and the inode cache.
//!
//! Each superblock owns a hash table of its inodes keyed by id (see [`Superblock`]); the
//! [`InodeCache`] is the part shared by every superblock: the allocation pool and the LRU zone.

use std::fmt;
use std::time::SystemTime;

use tracing::{trace, warn};

use crate::cache::eviction::lru::{LruZone, TryEvict};
use crate::cache::quota::{Quota, QuotaToken};
use crate::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use crate::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use super::backend::{FileOps, InodeInit, InodeOps};
use super::error::{VfsError, VfsResult};
use super::pcache::PageCache;
use super::superblock::Superblock;
use super::{InodeId, InodeKind, Metadata};

/// Mutable inode attributes.
#[derive(Debug, Clone, Copy)]
struct InodeMeta {
    kind: InodeKind,
    size: u64,
    accessed: SystemTime,
    modified: SystemTime,
    created: SystemTime,
}

/// In-memory handle of a backend file object.
///
/// `link_count` counts the cached dentries naming this inode, `open_count` the open files on it.
/// The inode cache only reclaims an inode once both are zero.
pub struct Inode {
    serial: u64,
    id: AtomicU64,
    superblock: Arc<Superblock>,
    ops: Arc<dyn InodeOps>,
    fops: Arc<dyn FileOps>,
    meta: RwLock<InodeMeta>,
    link_count: AtomicU32,
    open_count: AtomicU32,
    pcache: Mutex<Option<Arc<PageCache>>>,
    lock: Mutex<()>,
    _slot: QuotaToken,
}

impl fmt::Debug for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inode")
            .field("id", &self.id())
            .field("superblock", &self.superblock.id())
            .field("kind", &self.kind())
            .field("link_count", &self.link_count())
            .field("open_count", &self.open_count())
            .finish_non_exhaustive()
    }
}

impl Inode {
    /// Backend id.
    #[must_use]
    pub fn id(&self) -> InodeId {
        self.id.load(Ordering::Acquire)
    }

    /// Set the backend id. Follow up with [`Superblock::hash_inode`] to make the inode findable.
    pub fn set_id(&self, id: InodeId) {
        self.id.store(id, Ordering::Release);
    }

    /// Allocation serial, unique across superblocks. Keys the LRU zone.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Owning superblock.
    #[must_use]
    pub fn superblock(&self) -> &Arc<Superblock> {
        &self.superblock
    }

    /// Inode operations.
    #[must_use]
    pub fn ops(&self) -> &Arc<dyn InodeOps> {
        &self.ops
    }

    /// Default file operations.
    #[must_use]
    pub fn fops(&self) -> &Arc<dyn FileOps> {
        &self.fops
    }

    /// Inode type.
    #[must_use]
    pub fn kind(&self) -> InodeKind {
        self.meta.read().kind
    }

    /// Change the inode type (for example when a backend turns a fresh inode into a symlink).
    pub fn set_kind(&self, kind: InodeKind) {
        self.meta.write().kind = kind;
    }

    /// Size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.meta.read().size
    }

    /// Set the size in bytes.
    pub fn set_size(&self, size: u64) {
        self.meta.write().size = size;
    }

    /// Grow the size to at least `size`.
    pub fn extend_size(&self, size: u64) {
        let mut meta = self.meta.write();
        meta.size = meta.size.max(size);
    }

    pub(crate) fn mark_accessed(&self) {
        self.meta.write().accessed = SystemTime::now();
    }

    pub(crate) fn mark_modified(&self) {
        self.meta.write().modified = SystemTime::now();
    }

    /// Number of cached dentries naming this inode.
    #[must_use]
    pub fn link_count(&self) -> u32 {
        self.link_count.load(Ordering::Acquire)
    }

    /// Number of open files on this inode.
    #[must_use]
    pub fn open_count(&self) -> u32 {
        self.open_count.load(Ordering::Acquire)
    }

    pub(crate) fn link_count_inc(&self) {
        self.link_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn link_count_dec(&self) {
        let prev = self.link_count.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "inode {} link count underflow", self.id());
    }

    pub(crate) fn open_count_inc(&self) {
        self.open_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn open_count_dec(&self) {
        let prev = self.open_count.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "inode {} open count underflow", self.id());
    }

    /// The attached page cache, if any.
    #[must_use]
    pub fn page_cache(&self) -> Option<Arc<PageCache>> {
        self.pcache.lock().clone()
    }

    /// Attach a page cache with `page_size` pages unless one is already present.
    pub(crate) fn attach_page_cache(&self, page_size: usize) -> Arc<PageCache> {
        Arc::clone(
            self.pcache
                .lock()
                .get_or_insert_with(|| Arc::new(PageCache::new(page_size))),
        )
    }

    fn detach_page_cache(&self) -> Option<Arc<PageCache>> {
        self.pcache.lock().take()
    }

    pub(crate) fn raw_lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Snapshot of the inode's metadata.
    #[must_use]
    pub fn metadata(&self) -> Metadata {
        let meta = *self.meta.read();
        Metadata {
            id: self.id(),
            superblock: self.superblock.id(),
            kind: meta.kind,
            size: meta.size,
            link_count: self.link_count(),
            open_count: self.open_count(),
            accessed: meta.accessed,
            modified: meta.modified,
            created: meta.created,
        }
    }
}

/// Allocation pool and LRU zone shared by every superblock's inode table.
pub struct InodeCache {
    zone: LruZone<u64, Weak<Inode>>,
    quota: Arc<Quota>,
    next_serial: AtomicU64,
}

impl InodeCache {
    /// Creates a cache allowing at most `capacity` live inodes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            zone: LruZone::new("icache"),
            quota: Quota::new(capacity),
            next_serial: AtomicU64::new(1),
        }
    }

    /// Allocate an inode for `sb`, let the backend initialise it, stamp its times and register
    /// it with the LRU zone. The inode is not hashed yet.
    pub fn alloc(&self, sb: &Arc<Superblock>) -> VfsResult<Arc<Inode>> {
        let slot = self.grab_slot()?;
        let mut init = InodeInit::default();
        sb.ops().init_inode(sb, &mut init);

        let now = SystemTime::now();
        let inode = Arc::new(Inode {
            serial: self.next_serial.fetch_add(1, Ordering::Relaxed),
            id: AtomicU64::new(init.id),
            superblock: Arc::clone(sb),
            ops: init.ops,
            fops: init.fops,
            meta: RwLock::new(InodeMeta {
                kind: init.kind,
                size: init.size,
                accessed: now,
                modified: now,
                created: now,
            }),
            link_count: AtomicU32::new(0),
            open_count: AtomicU32::new(0),
            pcache: Mutex::new(None),
            lock: Mutex::new(()),
            _slot: slot,
        });
        self.touch(&inode);
        Ok(inode)
    }

    fn grab_slot(&self) -> VfsResult<QuotaToken> {
        if let Some(slot) = self.quota.try_acquire() {
            return Ok(slot);
        }
        self.evict_half();
        self.quota.try_acquire().ok_or(VfsError::OutOfMemory)
    }

    /// Look `id` up in `sb`'s table.
    #[must_use]
    pub fn find(&self, sb: &Superblock, id: InodeId) -> Option<Arc<Inode>> {
        let inode = sb.lookup_inode(id)?;
        self.touch(&inode);
        Some(inode)
    }

    /// Record a use of `inode` with the LRU zone.
    pub fn touch(&self, inode: &Arc<Inode>) {
        self.zone.use_one(inode.serial, Arc::downgrade(inode));
    }

    /// Take `inode`'s lock, recording the use.
    pub fn lock<'a>(&self, inode: &'a Arc<Inode>) -> MutexGuard<'a, ()> {
        let guard = inode.raw_lock();
        self.touch(inode);
        guard
    }

    /// Run one eviction pass over the zone. Returns the number of inodes reclaimed.
    pub fn evict_half(&self) -> usize {
        self.zone.evict_half(self)
    }

    /// Reclaim `inode` if no dentry names it and no file has it open. Commits dirty pages and
    /// runs the backend sync first.
    ///
    /// An inode handed out by [`InodeCache::find`] but not yet bound to a dentry is held by its
    /// finder, so it is not idle and survives the attempt. `inode` itself is expected to be the
    /// caller's only handle besides the superblock table.
    pub fn try_reclaim(&self, inode: &Arc<Inode>) -> bool {
        let Some(_guard) = inode.lock.try_lock() else {
            return false;
        };
        if inode.link_count() != 0 || inode.open_count() != 0 {
            return false;
        }
        if let Some(pcache) = inode.page_cache()
            && let Err(e) = pcache.commit_all(inode)
        {
            warn!(inode = inode.id(), error = %e, "keeping inode with uncommitted pages");
            return false;
        }
        if !inode.superblock.unhash_idle_inode(inode) {
            return false;
        }
        self.retire(inode);
        true
    }

    /// Sync and drop an inode that is no longer hashed. The caller holds the inode lock.
    fn retire(&self, inode: &Arc<Inode>) {
        if let Some(pcache) = inode.detach_page_cache() {
            pcache.release();
        }
        match inode.ops.sync(inode) {
            Ok(()) | Err(VfsError::Unsupported) => {}
            Err(e) => warn!(inode = inode.id(), error = %e, "backend sync failed during reclaim"),
        }
        self.zone.forget(&inode.serial);
        trace!(inode = inode.id(), "inode reclaimed");
    }

    /// Retire every inode of `sb`. Used at unmount, after the caller has verified nothing on the
    /// superblock is busy.
    pub(crate) fn purge(&self, sb: &Superblock) {
        for inode in sb.inodes() {
            let _guard = inode.raw_lock();
            if let Some(pcache) = inode.page_cache()
                && let Err(e) = pcache.commit_all(&inode)
            {
                warn!(inode = inode.id(), error = %e, "failed to commit pages at unmount");
            }
            sb.unhash_inode(&inode);
            self.retire(&inode);
        }
    }

    /// Number of inodes tracked by the zone.
    #[must_use]
    pub fn len(&self) -> usize {
        self.zone.len()
    }

    /// Whether the zone is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.zone.is_empty()
    }

    /// The recency zone.
    #[must_use]
    pub fn zone(&self) -> &LruZone<u64, Weak<Inode>> {
        &self.zone
    }

    /// The inode pool.
    #[must_use]
    pub fn quota(&self) -> &Arc<Quota> {
        &self.quota
    }
}

impl TryEvict<u64, Weak<Inode>> for InodeCache {
    fn try_evict(&self, _serial: &u64, node: &Weak<Inode>) -> bool {
        node.upgrade().is_none_or(|inode| self.try_reclaim(&inode))
    }
}
