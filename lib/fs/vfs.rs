//! The VFS context object and the dentry-level façade operations.

use std::fmt;

use tracing::{debug, info, instrument, warn};

use crate::config::VfsConfig;
use crate::sync::atomic::{AtomicU64, Ordering};
use crate::sync::{Arc, MutexGuard};

use super::backend::Filesystem;
use super::dcache::DCache;
use super::dentry::{Dentry, DentryPin};
use super::error::{VfsError, VfsResult};
use super::file::{OpenFile, Process};
use super::hstr::HStr;
use super::inode::{Inode, InodeCache};
use super::mount::{Covered, Mount};
use super::superblock::{Superblock, SuperblockId};
use super::{InodeKind, MountFlags};

/// Parent chains longer than this are treated as corrupt when rebuilding a path.
const MAX_PATH_DEPTH: usize = 64;

/// A complete VFS instance: caches, LRU zones, the global root and the filesystem registry.
///
/// Construction order matters: both caches (and with them their LRU zones) exist before the
/// root dentry is allocated. Instances are fully independent, so tests build one each.
pub struct Vfs {
    pub(crate) config: VfsConfig,
    pub(crate) dcache: DCache,
    pub(crate) icache: Arc<InodeCache>,
    root: Arc<Dentry>,
    filesystems: scc::HashMap<String, Arc<dyn Filesystem>>,
    next_sb: AtomicU64,
}

impl fmt::Debug for Vfs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vfs")
            .field("dentries", &self.dcache.len())
            .field("inodes", &self.icache.len())
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl Vfs {
    /// Boots an empty VFS. Nothing is mounted yet; see [`Vfs::mount_root`].
    ///
    /// Fails with [`VfsError::InvalidArgument`] if `config` does not pass
    /// [`VfsConfig::validate`].
    pub fn new(config: VfsConfig) -> VfsResult<Self> {
        if let Err(errors) = config.validate() {
            warn!(?errors, "rejecting invalid configuration");
            return Err(VfsError::InvalidArgument);
        }
        let dcache = DCache::new(config.dcache.capacity);
        let icache = Arc::new(InodeCache::new(config.icache.capacity));
        let root = dcache.alloc(None, HStr::new(""))?;
        // Never hashed, so this is the permanent pin rather than cache membership.
        root.get();
        Ok(Self {
            config,
            dcache,
            icache,
            root,
            filesystems: scc::HashMap::new(),
            next_sb: AtomicU64::new(1),
        })
    }

    /// Configuration this instance was built with.
    #[must_use]
    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    /// The dentry cache.
    #[must_use]
    pub fn dcache(&self) -> &DCache {
        &self.dcache
    }

    /// The inode cache.
    #[must_use]
    pub fn icache(&self) -> &Arc<InodeCache> {
        &self.icache
    }

    /// The global root dentry.
    #[must_use]
    pub fn root(&self) -> &Arc<Dentry> {
        &self.root
    }

    /// A fresh process rooted at the global root.
    #[must_use]
    pub fn new_process(&self) -> Process {
        Process::new(self.config.max_fds)
    }

    /// Make `fs` mountable under its name.
    pub fn register_filesystem(&self, fs: Arc<dyn Filesystem>) -> VfsResult<()> {
        let name = fs.name().to_owned();
        self.filesystems
            .insert_sync(name, fs)
            .map_err(|_| VfsError::AlreadyExists)
    }

    /// Mount `fs_name` on the global root.
    pub fn mount_root(&self, fs_name: &str, flags: MountFlags) -> VfsResult<Arc<Mount>> {
        self.mount_at(&Arc::clone(&self.root), fs_name, flags)
    }

    /// Mount a new instance of `fs_name` on `target`.
    ///
    /// `target` becomes the root of the new superblock. Its cached children are reclaimed
    /// first; if any of them is in use the mount fails with [`VfsError::Busy`].
    #[instrument(name = "Vfs::mount_at", level = "debug", skip(self, target), fields(target = ?target.id()))]
    pub(crate) fn mount_at(
        &self,
        target: &Arc<Dentry>,
        fs_name: &str,
        flags: MountFlags,
    ) -> VfsResult<Arc<Mount>> {
        let fs = self
            .filesystems
            .read_sync(fs_name, |_, fs| Arc::clone(fs))
            .ok_or(VfsError::NoDevice)?;

        let _guard = self.dcache.lock(target);
        if target.kind().is_some_and(|k| !k.is_dir()) {
            return Err(VfsError::NotADirectory);
        }
        if !self.dcache.prune_children(target) {
            return Err(VfsError::Busy);
        }

        let sb = Superblock::new(
            SuperblockId(self.next_sb.fetch_add(1, Ordering::Relaxed)),
            fs.name(),
            flags,
            fs.instantiate()?,
            Arc::clone(&self.icache),
        );
        let root_inode = sb.ops().mount_root(&sb)?;

        let covered = Covered {
            inode: target.inode(),
            superblock: target.superblock(),
            mount: target.mount(),
        };
        let mount = Mount::new(Arc::clone(&sb), Arc::clone(target), target.mount(), covered);

        root_inode.link_count_inc();
        drop(target.replace_inode(Some(root_inode)));
        target.set_superblock(Some(Arc::clone(&sb)));
        target.set_mount(Some(Arc::clone(&mount)));
        sb.set_root(Some(Arc::clone(target)));
        target.get();

        info!(fs = fs_name, superblock = ?sb.id(), "mounted");
        Ok(mount)
    }

    /// Unmount the filesystem whose root is `target`, restoring what it covered.
    #[instrument(name = "Vfs::unmount_at", level = "debug", skip(self, target), fields(target = ?target.id()))]
    pub(crate) fn unmount_at(&self, target: &Arc<Dentry>) -> VfsResult<()> {
        let mount = target
            .mount()
            .filter(|m| Arc::ptr_eq(m.root(), target))
            .ok_or(VfsError::InvalidArgument)?;

        let _guard = self.dcache.lock(target);
        if mount.busy() > 0 || mount.submounts() > 0 {
            return Err(VfsError::Busy);
        }
        if !self.dcache.prune_children(target) {
            return Err(VfsError::Busy);
        }
        let covered = mount.take_covered().ok_or(VfsError::InvalidArgument)?;
        let sb = Arc::clone(mount.superblock());

        if let Some(root_inode) = target.replace_inode(covered.inode) {
            root_inode.link_count_dec();
        }
        target.set_superblock(covered.superblock);
        target.set_mount(covered.mount);
        target.put();

        self.icache.purge(&sb);
        if let Err(e) = sb.ops().unmount(&sb) {
            warn!(superblock = ?sb.id(), error = %e, "backend unmount hook failed");
        }
        sb.set_root(None);
        mount.detach_from_parent();

        info!(superblock = ?sb.id(), "unmounted");
        Ok(())
    }

    pub(crate) fn lock_inode<'a>(&self, inode: &'a Arc<Inode>) -> MutexGuard<'a, ()> {
        self.icache.lock(inode)
    }

    /// Lock two directories in a deadlock-free order: an ancestor before its descendant,
    /// otherwise by ascending id.
    pub(crate) fn lock_two<'a>(
        &self,
        a: &'a Arc<Dentry>,
        b: &'a Arc<Dentry>,
    ) -> (MutexGuard<'a, ()>, Option<MutexGuard<'a, ()>>) {
        if Arc::ptr_eq(a, b) {
            return (self.dcache.lock(a), None);
        }
        let a_first = if is_ancestor(a, b) {
            true
        } else if is_ancestor(b, a) {
            false
        } else {
            a.id() < b.id()
        };
        if a_first {
            let first = self.dcache.lock(a);
            (first, Some(self.dcache.lock(b)))
        } else {
            let first = self.dcache.lock(b);
            (first, Some(self.dcache.lock(a)))
        }
    }

    /// Open `dentry` for I/O.
    ///
    /// On success the dentry gains a reference, the inode an open, and the mount a busy pin.
    pub fn open_dentry(&self, dentry: &Arc<Dentry>) -> VfsResult<Arc<OpenFile>> {
        let inode = dentry.inode().ok_or(VfsError::Unsupported)?;
        let _guard = self.lock_inode(&inode);

        let file = OpenFile::new(Arc::clone(dentry), Arc::clone(&inode));
        if inode.kind() == InodeKind::File && inode.page_cache().is_none() {
            inode.attach_page_cache(self.config.page_size);
        }
        inode.ops().open(&inode, &file)?;

        dentry.get();
        inode.open_count_inc();
        if let Some(mount) = file.mount() {
            mount.mkbusy();
        }
        Ok(Arc::new(file))
    }

    /// Close the last descriptor of `file`.
    pub fn close_file(&self, file: &Arc<OpenFile>) -> VfsResult<()> {
        file.ops().close(file)?;

        let inode = file.inode();
        let _guard = self.lock_inode(inode);
        file.dentry().put();
        inode.open_count_dec();
        super::mount::chillax(file.mount());

        if let Some(pcache) = inode.page_cache()
            && let Err(e) = pcache.commit_all(inode)
        {
            warn!(inode = inode.id(), error = %e, "failed to commit pages on close");
        }
        Ok(())
    }

    /// Commit dirty pages and ask the backend to sync.
    pub fn fsync_file(&self, file: &OpenFile) -> VfsResult<()> {
        let inode = file.inode();
        let _guard = self.lock_inode(inode);
        if let Some(pcache) = inode.page_cache() {
            pcache.commit_all(inode)?;
        }
        file.ops().sync(file)
    }

    /// Allocate a placeholder for `name` under `parent`, let `make` create it in the backend, and
    /// publish it. Returns the pinned new dentry.
    pub(crate) fn create_child(
        &self,
        parent: &Arc<Dentry>,
        name: HStr,
        make: impl FnOnce(&Arc<Inode>, &Dentry) -> VfsResult<()>,
    ) -> VfsResult<DentryPin> {
        let dir = parent.inode().ok_or(VfsError::NoDevice)?;
        if !dir.kind().is_dir() {
            return Err(VfsError::NotADirectory);
        }
        if parent.superblock().is_some_and(|sb| sb.is_read_only()) {
            return Err(VfsError::ReadOnly);
        }

        let _guard = self.dcache.lock(parent);
        if self.dcache.lookup(parent, &name).is_some() {
            return Err(VfsError::AlreadyExists);
        }
        let placeholder = self.dcache.alloc(Some(parent), name)?;
        let made = {
            let _dir_guard = self.lock_inode(&dir);
            make(&dir, &placeholder)
        };
        match made {
            Ok(()) if placeholder.inode().is_some() => {
                debug!(parent = ?parent.id(), dentry = ?placeholder.id(), "created");
                Ok(self.dcache.add_pinned(parent, placeholder))
            }
            Ok(()) => {
                self.dcache.release(&placeholder);
                Err(VfsError::NotFound)
            }
            Err(e) => {
                self.dcache.release(&placeholder);
                Err(e)
            }
        }
    }

    /// Add `name` under `parent` as another name for `to_link`'s inode.
    pub fn link_dentry(
        &self,
        to_link: &Arc<Dentry>,
        parent: &Arc<Dentry>,
        name: HStr,
    ) -> VfsResult<()> {
        let inode = to_link.inode().ok_or(VfsError::NotFound)?;
        let (Some(src_sb), Some(dst_sb)) = (to_link.superblock(), parent.superblock()) else {
            return Err(VfsError::NoDevice);
        };
        if !Arc::ptr_eq(&src_sb, &dst_sb) {
            return Err(VfsError::CrossDevice);
        }
        if dst_sb.is_read_only() {
            return Err(VfsError::ReadOnly);
        }
        if !parent.kind().is_some_and(InodeKind::is_dir) {
            return Err(VfsError::NotADirectory);
        }

        let _guard = self.dcache.lock(parent);
        if self.dcache.lookup(parent, &name).is_some() {
            return Err(VfsError::AlreadyExists);
        }
        let placeholder = self.dcache.alloc(Some(parent), name)?;
        let linked = {
            let _inode_guard = self.lock_inode(&inode);
            inode.ops().link(&inode, &placeholder)
        };
        if let Err(e) = linked {
            self.dcache.release(&placeholder);
            return Err(e);
        }
        placeholder.assign_inode(inode);
        self.dcache.add(parent, &placeholder);
        Ok(())
    }

    /// Remove the non-directory `target`.
    pub fn unlink_dentry(&self, target: DentryPin) -> VfsResult<()> {
        let sb = target.superblock().ok_or(VfsError::NoDevice)?;
        if sb.is_read_only() {
            return Err(VfsError::ReadOnly);
        }
        let parent = target.parent().ok_or(VfsError::InvalidArgument)?;
        let target_arc = Arc::clone(&target);

        let _parent_guard = self.dcache.lock(&parent);
        let _guard = self.dcache.lock(&target_arc);
        drop(target);
        if target_arc.ref_count() > 1 || target_arc.is_mount_root() {
            return Err(VfsError::Busy);
        }
        let inode = target_arc.inode().ok_or(VfsError::NotFound)?;
        if inode.open_count() > 0 {
            return Err(VfsError::Busy);
        }
        if inode.kind().is_dir() {
            return Err(VfsError::IsADirectory);
        }

        let dir = parent.inode().ok_or(VfsError::NoDevice)?;
        {
            let _dir_guard = self.lock_inode(&dir);
            dir.ops().unlink(&dir, &target_arc)?;
        }
        self.dcache.free(&target_arc);
        debug!(dentry = ?target_arc.id(), "unlinked");
        Ok(())
    }

    /// Remove the empty directory `target`.
    pub fn rmdir_dentry(&self, target: DentryPin) -> VfsResult<()> {
        let sb = target.superblock().ok_or(VfsError::NoDevice)?;
        if sb.is_read_only() {
            return Err(VfsError::ReadOnly);
        }
        let parent = target.parent();
        let target_arc = Arc::clone(&target);

        let _parent_guard = parent.as_ref().map(|p| self.dcache.lock(p));
        let _guard = self.dcache.lock(&target_arc);
        drop(target);

        let inode = target_arc.inode().ok_or(VfsError::NotFound)?;
        if target_arc.ref_count() > 1 || target_arc.is_mount_root() || inode.open_count() > 0 {
            return Err(VfsError::Busy);
        }
        if target_arc.has_children() {
            return Err(VfsError::NotEmpty);
        }
        let Some(parent) = parent.as_ref() else {
            return Err(VfsError::InvalidArgument);
        };
        if !inode.kind().is_dir() {
            return Err(VfsError::NotADirectory);
        }

        let dir = parent.inode().ok_or(VfsError::NoDevice)?;
        {
            let _dir_guard = self.lock_inode(&dir);
            dir.ops().rmdir(&dir, &target_arc)?;
        }
        self.dcache.free(&target_arc);
        debug!(dentry = ?target_arc.id(), "removed directory");
        Ok(())
    }

    /// Move `cur` to `name` under `new_parent`, replacing `target` (the current holder of that
    /// name, if any).
    ///
    /// Renaming onto a name for the same inode is a successful no-op.
    pub fn rename_dentry(
        &self,
        cur: DentryPin,
        new_parent: &Arc<Dentry>,
        name: HStr,
        target: Option<DentryPin>,
    ) -> VfsResult<()> {
        if name.is_dot() || name.is_dotdot() {
            return Err(VfsError::InvalidArgument);
        }
        let cur_inode = cur.inode().ok_or(VfsError::NotFound)?;
        if let Some(target) = &target {
            let same_sb = match (cur.superblock(), target.superblock()) {
                (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
                _ => false,
            };
            let same_inode = target.inode().is_some_and(|t| t.id() == cur_inode.id());
            if Arc::ptr_eq(&cur, target) || (same_sb && same_inode) {
                return Ok(());
            }
        }

        let old_parent = cur.parent().ok_or(VfsError::Busy)?;
        if cur.is_mount_root() {
            return Err(VfsError::Busy);
        }
        let (Some(src_sb), Some(dst_sb)) = (cur.superblock(), new_parent.superblock()) else {
            return Err(VfsError::NoDevice);
        };
        if !Arc::ptr_eq(&src_sb, &dst_sb) {
            return Err(VfsError::CrossDevice);
        }
        if src_sb.is_read_only() {
            return Err(VfsError::ReadOnly);
        }
        if is_ancestor(&cur, new_parent) {
            return Err(VfsError::InvalidArgument);
        }
        if target
            .as_ref()
            .is_some_and(|t| Arc::ptr_eq(t, &old_parent) || is_ancestor(t, &cur))
        {
            return Err(VfsError::NotEmpty);
        }

        let _rename_guard = src_sb.rename_lock();
        let _parent_guards = self.lock_two(&old_parent, new_parent);
        let cur_arc = Arc::clone(&cur);
        let target_arc = target.as_ref().map(|t| Arc::clone(t));
        let _cur_guard = self.dcache.lock(&cur_arc);
        let _target_guard = target_arc.as_ref().map(|t| self.dcache.lock(t));
        drop(cur);
        drop(target);

        if cur_arc.ref_count() > 1 {
            return Err(VfsError::Busy);
        }
        if let Some(target) = &target_arc {
            if target.ref_count() > 1 || target.is_mount_root() {
                return Err(VfsError::Busy);
            }
            match (cur_inode.kind().is_dir(), target.kind().is_some_and(InodeKind::is_dir)) {
                (true, false) => return Err(VfsError::NotADirectory),
                (false, true) => return Err(VfsError::IsADirectory),
                _ => {}
            }
            if target.has_children() {
                return Err(VfsError::NotEmpty);
            }
        }

        let dst = match &target_arc {
            Some(target) => Arc::clone(target),
            None => self.dcache.alloc(Some(new_parent), name.clone())?,
        };
        let renamed = {
            let _inode_guard = self.lock_inode(&cur_inode);
            cur_inode.ops().rename(&cur_inode, &cur_arc, &dst)
        };
        if target_arc.is_some() {
            renamed?;
            self.dcache.free(&dst);
        } else {
            self.dcache.release(&dst);
            renamed?;
        }

        self.dcache.rehash(new_parent, &cur_arc, Some(name));
        debug!(dentry = ?cur_arc.id(), parent = ?new_parent.id(), "renamed");
        Ok(())
    }

    /// Rebuild the absolute path of `dentry` from its parent chain.
    pub fn path_of(&self, dentry: &Arc<Dentry>) -> VfsResult<String> {
        let mut parts = Vec::new();
        let mut cur = Arc::clone(dentry);
        while let Some(parent) = cur.parent() {
            if parts.len() >= MAX_PATH_DEPTH {
                return Err(VfsError::SymlinkLoop);
            }
            parts.push(cur.name());
            cur = parent;
        }
        if parts.is_empty() {
            return Ok("/".to_owned());
        }
        let mut path = String::new();
        for part in parts.iter().rev() {
            path.push('/');
            path.push_str(part.as_str());
        }
        Ok(path)
    }
}

/// Whether `ancestor` is `dentry` or one of its parents.
pub(crate) fn is_ancestor(ancestor: &Arc<Dentry>, dentry: &Arc<Dentry>) -> bool {
    let mut cur = Some(Arc::clone(dentry));
    while let Some(d) = cur {
        if Arc::ptr_eq(&d, ancestor) {
            return true;
        }
        cur = d.parent();
    }
    false
}
