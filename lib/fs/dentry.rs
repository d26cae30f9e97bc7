//! Dentries: one cached path component each.

use std::fmt;
use std::ops::Deref;

use rustc_hash::FxHashMap;

use crate::cache::quota::QuotaToken;
use crate::sync::atomic::{AtomicU32, Ordering};
use crate::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use super::InodeKind;
use super::hstr::HStr;
use super::inode::Inode;
use super::mount::Mount;
use super::superblock::Superblock;

/// Stable handle of a dentry, unique for the lifetime of a [`crate::fs::Vfs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DentryId(pub(crate) u64);

impl DentryId {
    /// The raw value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// One resolved path component.
///
/// # Reference counting
///
/// `ref_count` is the VFS-level count, separate from the `Arc` strong count. Cache membership
/// contributes exactly one; open files, working directories, mount roots and transient walk
/// pins each add one more. A hashed dentry whose count is exactly one is owned by the cache
/// alone and may be reclaimed. A count of zero means the dentry has left the cache and can no
/// longer be pinned.
///
/// # Locking
///
/// `lock` serialises structural edits below this dentry (lookup-then-insert, create, remove,
/// rename). The remaining fields sit behind short-lived leaf locks that are never held while
/// another structural lock is taken.
pub struct Dentry {
    id: DentryId,
    name: RwLock<HStr>,
    parent: RwLock<Weak<Dentry>>,
    children: Mutex<FxHashMap<DentryId, Weak<Dentry>>>,
    inode: RwLock<Option<Arc<Inode>>>,
    superblock: RwLock<Option<Arc<Superblock>>>,
    mount: RwLock<Option<Arc<Mount>>>,
    ref_count: AtomicU32,
    lock: Mutex<()>,
    _slot: QuotaToken,
}

impl fmt::Debug for Dentry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dentry")
            .field("id", &self.id)
            .field("name", &*self.name.read())
            .field("ref_count", &self.ref_count())
            .field("inode", &self.inode().map(|i| i.id()))
            .finish_non_exhaustive()
    }
}

impl Dentry {
    pub(crate) fn new(id: DentryId, name: HStr, slot: QuotaToken) -> Self {
        Self {
            id,
            name: RwLock::new(name),
            parent: RwLock::new(Weak::new()),
            children: Mutex::new(FxHashMap::default()),
            inode: RwLock::new(None),
            superblock: RwLock::new(None),
            mount: RwLock::new(None),
            ref_count: AtomicU32::new(0),
            lock: Mutex::new(()),
            _slot: slot,
        }
    }

    /// Stable handle.
    #[must_use]
    pub fn id(&self) -> DentryId {
        self.id
    }

    /// Component name.
    #[must_use]
    pub fn name(&self) -> HStr {
        self.name.read().clone()
    }

    /// Parent directory, if this dentry is linked below one.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<Dentry>> {
        self.parent.read().upgrade()
    }

    /// The inode this dentry names, if it has been resolved.
    #[must_use]
    pub fn inode(&self) -> Option<Arc<Inode>> {
        self.inode.read().clone()
    }

    /// Type of the named inode.
    #[must_use]
    pub fn kind(&self) -> Option<InodeKind> {
        self.inode.read().as_ref().map(|i| i.kind())
    }

    /// Superblock this dentry belongs to.
    #[must_use]
    pub fn superblock(&self) -> Option<Arc<Superblock>> {
        self.superblock.read().clone()
    }

    /// Mount this dentry belongs to.
    #[must_use]
    pub fn mount(&self) -> Option<Arc<Mount>> {
        self.mount.read().clone()
    }

    /// Current VFS reference count.
    #[must_use]
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Whether any child is cached.
    #[must_use]
    pub fn has_children(&self) -> bool {
        !self.children.lock().is_empty()
    }

    /// Cached children, in no particular order.
    #[must_use]
    pub fn children(&self) -> Vec<Arc<Dentry>> {
        self.children
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Whether this dentry is the root of the mount it belongs to.
    #[must_use]
    pub fn is_mount_root(&self) -> bool {
        self.mount().is_some_and(|m| m.root().id() == self.id)
    }

    /// Bind `inode` to this dentry, moving the link count from the previous inode (if any) to
    /// the new one. Backends call this from `dir_lookup` and the create family.
    pub fn assign_inode(&self, inode: Arc<Inode>) {
        inode.link_count_inc();
        if let Some(old) = self.inode.write().replace(inode) {
            old.link_count_dec();
        }
    }

    /// Detach the inode, dropping its link count.
    pub(crate) fn clear_inode(&self) -> Option<Arc<Inode>> {
        let old = self.inode.write().take();
        if let Some(old) = &old {
            old.link_count_dec();
        }
        old
    }

    /// Swap the inode without touching either link count. Mounting uses this to cover and
    /// uncover a mount point.
    pub(crate) fn replace_inode(&self, inode: Option<Arc<Inode>>) -> Option<Arc<Inode>> {
        std::mem::replace(&mut *self.inode.write(), inode)
    }

    /// Raw structural lock. Prefer [`crate::fs::dcache::DCache::lock`], which also records the
    /// use with the LRU zone.
    pub(crate) fn raw_lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    pub(crate) fn try_raw_lock(&self) -> Option<MutexGuard<'_, ()>> {
        self.lock.try_lock()
    }

    pub(crate) fn set_name(&self, name: HStr) {
        *self.name.write() = name;
    }

    pub(crate) fn set_parent(&self, parent: Option<&Arc<Dentry>>) {
        *self.parent.write() = parent.map_or_else(Weak::new, Arc::downgrade);
    }

    pub(crate) fn set_superblock(&self, sb: Option<Arc<Superblock>>) {
        *self.superblock.write() = sb;
    }

    pub(crate) fn set_mount(&self, mount: Option<Arc<Mount>>) {
        *self.mount.write() = mount;
    }

    pub(crate) fn link_child(&self, child: &Arc<Dentry>) {
        self.children
            .lock()
            .insert(child.id(), Arc::downgrade(child));
    }

    pub(crate) fn unlink_child(&self, child: DentryId) {
        self.children.lock().remove(&child);
    }

    pub(crate) fn get(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn put(&self) {
        let prev = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "dentry {:?} reference count underflow", self.id);
    }

    /// Take a reference unless the dentry has already left the cache.
    pub(crate) fn try_get(&self) -> bool {
        self.ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 0).then_some(n + 1)
            })
            .is_ok()
    }

    /// Drop the cache's reference if nothing else holds one.
    pub(crate) fn try_release_cache_ref(&self) -> bool {
        self.ref_count
            .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// A transient reference on a dentry, released on drop.
///
/// The walker hands its result back pinned so the dentry cannot be reclaimed between the walk
/// and the caller taking its locks. Callers that check for extra references (busy detection)
/// drop the pin with [`DentryPin::unpin`] once they hold the relevant locks.
pub struct DentryPin {
    dentry: Arc<Dentry>,
}

impl DentryPin {
    /// Pin `dentry`. The caller must know the dentry is live (for example because it was just
    /// found in the cache under its parent's lock).
    pub(crate) fn new(dentry: Arc<Dentry>) -> Self {
        dentry.get();
        Self { dentry }
    }

    /// Pin `dentry` unless it has already been released from the cache.
    pub(crate) fn try_new(dentry: Arc<Dentry>) -> Option<Self> {
        dentry.try_get().then_some(Self { dentry })
    }

    /// Release the pin and keep the handle.
    #[must_use]
    pub fn unpin(self) -> Arc<Dentry> {
        let dentry = Arc::clone(&self.dentry);
        drop(self);
        dentry
    }
}

impl Deref for DentryPin {
    type Target = Arc<Dentry>;

    fn deref(&self) -> &Self::Target {
        &self.dentry
    }
}

impl Drop for DentryPin {
    fn drop(&mut self) {
        self.dentry.put();
    }
}

impl fmt::Debug for DentryPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DentryPin").field(&*self.dentry).finish()
    }
}
