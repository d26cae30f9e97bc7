//! Superblocks: one per mounted filesystem instance.

use std::fmt;

use crate::sync::{Arc, Mutex, MutexGuard, RwLock};

use super::MountFlags;
use super::backend::SuperOps;
use super::dentry::Dentry;
use super::error::VfsResult;
use super::inode::{Inode, InodeCache};
use super::InodeId;

/// Identifier of a superblock, unique for the lifetime of a [`crate::fs::Vfs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SuperblockId(pub(crate) u64);

/// Runtime handle of one mounted filesystem.
///
/// The superblock owns its inode table. Inodes point back at the superblock, so the table is
/// emptied explicitly at unmount.
pub struct Superblock {
    id: SuperblockId,
    fs_name: String,
    flags: MountFlags,
    ops: Arc<dyn SuperOps>,
    inodes: scc::HashMap<InodeId, Arc<Inode>>,
    icache: Arc<InodeCache>,
    root: RwLock<Option<Arc<Dentry>>>,
    rename_lock: Mutex<()>,
}

impl fmt::Debug for Superblock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Superblock")
            .field("id", &self.id)
            .field("fs", &self.fs_name)
            .field("flags", &self.flags)
            .field("inodes", &self.inodes.len())
            .finish_non_exhaustive()
    }
}

impl Superblock {
    pub(crate) fn new(
        id: SuperblockId,
        fs_name: &str,
        flags: MountFlags,
        ops: Arc<dyn SuperOps>,
        icache: Arc<InodeCache>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            fs_name: fs_name.to_owned(),
            flags,
            ops,
            inodes: scc::HashMap::new(),
            icache,
            root: RwLock::new(None),
            rename_lock: Mutex::new(()),
        })
    }

    /// Identifier.
    #[must_use]
    pub fn id(&self) -> SuperblockId {
        self.id
    }

    /// Name of the filesystem kind.
    #[must_use]
    pub fn fs_name(&self) -> &str {
        &self.fs_name
    }

    /// Mount flags.
    #[must_use]
    pub fn flags(&self) -> MountFlags {
        self.flags
    }

    /// Whether the superblock rejects mutations.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.flags.contains(MountFlags::READ_ONLY)
    }

    /// Backend operations.
    #[must_use]
    pub fn ops(&self) -> &Arc<dyn SuperOps> {
        &self.ops
    }

    /// Root dentry, while mounted.
    #[must_use]
    pub fn root(&self) -> Option<Arc<Dentry>> {
        self.root.read().clone()
    }

    pub(crate) fn set_root(&self, root: Option<Arc<Dentry>>) {
        *self.root.write() = root;
    }

    /// Allocate a fresh inode through the shared inode cache.
    pub fn alloc_inode(self: &Arc<Self>) -> VfsResult<Arc<Inode>> {
        self.icache.alloc(self)
    }

    /// Find a hashed inode by id.
    #[must_use]
    pub fn find_inode(&self, id: InodeId) -> Option<Arc<Inode>> {
        self.icache.find(self, id)
    }

    /// Publish `inode` under its current id.
    pub fn hash_inode(&self, inode: &Arc<Inode>) {
        self.inodes.upsert_sync(inode.id(), Arc::clone(inode));
    }

    pub(crate) fn lookup_inode(&self, id: InodeId) -> Option<Arc<Inode>> {
        self.inodes.read_sync(&id, |_, inode| Arc::clone(inode))
    }

    pub(crate) fn unhash_inode(&self, inode: &Arc<Inode>) {
        drop(
            self.inodes
                .remove_if_sync(&inode.id(), |cached| Arc::ptr_eq(&*cached, inode)),
        );
    }

    /// Unhash `inode` if nothing besides the table and the reclaiming caller holds it.
    ///
    /// The check runs under the table entry's lock, which [`Superblock::lookup_inode`] also
    /// takes, so a concurrent lookup either sees the inode before the check (and keeps it alive)
    /// or misses it afterwards.
    pub(crate) fn unhash_idle_inode(&self, inode: &Arc<Inode>) -> bool {
        self.inodes
            .remove_if_sync(&inode.id(), |cached| {
                Arc::ptr_eq(&*cached, inode)
                    && Arc::strong_count(inode) <= 2
                    && inode.link_count() == 0
                    && inode.open_count() == 0
            })
            .is_some()
    }

    /// Every hashed inode.
    #[must_use]
    pub fn inodes(&self) -> Vec<Arc<Inode>> {
        let mut out = Vec::with_capacity(self.inodes.len());
        self.inodes.iter_sync(|_, inode| {
            out.push(Arc::clone(inode));
            true
        });
        out
    }

    /// The inode cache this superblock allocates from.
    #[must_use]
    pub fn icache(&self) -> &Arc<InodeCache> {
        &self.icache
    }

    /// Serialises renames that move entries between directories of this superblock.
    pub(crate) fn rename_lock(&self) -> MutexGuard<'_, ()> {
        self.rename_lock.lock()
    }
}
