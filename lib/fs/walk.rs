//! Path resolution.
//!
//! The walker resolves one component at a time under the current directory's structural lock,
//! consulting the dentry cache first and the backend only on a miss. Every dentry it hands out
//! is pinned, so it survives until the caller has taken whatever locks it needs.

use tracing::{debug, trace};

use crate::sync::Arc;

use super::dentry::{Dentry, DentryPin};
use super::error::{VfsError, VfsResult};
use super::hstr::HStr;
use super::vfs::{Vfs, is_ancestor};
use super::WalkFlags;

/// Result of a walk.
#[derive(Debug)]
pub struct Walked {
    /// The resolved dentry, or its parent when walking with [`WalkFlags::PARENT`].
    pub dentry: DentryPin,
    /// The final, unresolved component under [`WalkFlags::PARENT`]. `None` when the path had no
    /// components (it named a root).
    pub trailing: Option<HStr>,
}

impl Vfs {
    /// Resolve `path` starting at `start` (or the global root when `None`), following symlinks
    /// up to the configured depth.
    pub fn walk(
        &self,
        start: Option<&Arc<Dentry>>,
        path: &str,
        flags: WalkFlags,
    ) -> VfsResult<Walked> {
        self.walk_with_depth(start, path, flags, self.config.symlink_depth)
    }

    /// [`Vfs::walk`] with an explicit symlink depth bound.
    pub fn walk_with_depth(
        &self,
        start: Option<&Arc<Dentry>>,
        path: &str,
        flags: WalkFlags,
        max_depth: usize,
    ) -> VfsResult<Walked> {
        if path.len() > self.config.path_max {
            return Err(VfsError::NameTooLong);
        }
        self.walk_at(start, path, flags, 0, max_depth)
    }

    fn walk_at(
        &self,
        start: Option<&Arc<Dentry>>,
        path: &str,
        flags: WalkFlags,
        depth: usize,
        max_depth: usize,
    ) -> VfsResult<Walked> {
        if depth > max_depth {
            debug!(depth, path, "symlink depth exceeded");
            return Err(VfsError::SymlinkLoop);
        }

        let origin = self.origin(start, path, flags);
        let mut current = DentryPin::try_new(origin).ok_or(VfsError::NotFound)?;
        let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
        let mut trailing = None;

        while let Some(raw) = components.next() {
            let name = HStr::component(raw, self.config.name_max)?;
            let last = components.peek().is_none();
            if last && flags.contains(WalkFlags::PARENT) {
                trailing = Some(name);
                break;
            }
            current = self.follow(current, depth, max_depth)?;
            current = self.step(&current, &name, last && flags.contains(WalkFlags::MKPARENT))?;
        }

        if trailing.is_some() || !flags.contains(WalkFlags::NOFOLLOW) {
            current = self.follow(current, depth, max_depth)?;
        }
        if current.inode().is_none() {
            return Err(VfsError::NoDevice);
        }
        Ok(Walked {
            dentry: current,
            trailing,
        })
    }

    fn origin(&self, start: Option<&Arc<Dentry>>, path: &str, flags: WalkFlags) -> Arc<Dentry> {
        if path.starts_with('/') {
            if flags.contains(WalkFlags::FSRELATIVE)
                && let Some(root) = start.and_then(|s| s.superblock()).and_then(|sb| sb.root())
            {
                return root;
            }
            return Arc::clone(self.root());
        }
        start.map_or_else(|| Arc::clone(self.root()), Arc::clone)
    }

    /// Resolve one component below `dir`.
    fn step(&self, dir: &Arc<Dentry>, name: &HStr, mkparent: bool) -> VfsResult<DentryPin> {
        let inode = dir.inode().ok_or(VfsError::NoDevice)?;
        if !inode.kind().is_dir() {
            return Err(VfsError::NotADirectory);
        }

        let _guard = self.dcache.lock(dir);
        if let Some(pinned) = self
            .dcache
            .lookup(dir, name)
            .and_then(DentryPin::try_new)
        {
            return Ok(pinned);
        }
        trace!(parent = ?dir.id(), %name, "dcache miss");

        let placeholder = self.dcache.alloc(Some(dir), name.clone())?;
        let resolved = {
            let _inode_guard = self.lock_inode(&inode);
            match inode.ops().dir_lookup(&inode, &placeholder) {
                Err(VfsError::NotFound) if mkparent => {
                    if inode.superblock().is_read_only() {
                        Err(VfsError::ReadOnly)
                    } else {
                        inode.ops().mkdir(&inode, &placeholder)
                    }
                }
                other => other,
            }
        };
        match resolved {
            Ok(()) if placeholder.inode().is_some() => Ok(self.dcache.add_pinned(dir, placeholder)),
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

    /// If `link` names a symlink, resolve it relative to the link's directory.
    fn follow(&self, link: DentryPin, depth: usize, max_depth: usize) -> VfsResult<DentryPin> {
        let Some(inode) = link.inode().filter(|i| i.kind().is_symlink()) else {
            return Ok(link);
        };
        let target = {
            let _guard = self.lock_inode(&inode);
            inode.ops().read_symlink(&inode)?
        };
        let base = link.parent().unwrap_or_else(|| Arc::clone(&link));
        let resolved = self
            .walk_at(Some(&base), &target, WalkFlags::empty(), depth + 1, max_depth)?
            .dentry;
        drop(link);
        Ok(self.splice(&base, resolved))
    }

    /// Move a symlink's target dentry under the link's directory so the next resolution of the
    /// same name there hits the cache.
    ///
    /// Only cold entries are moved, within one superblock, into a free slot, and never in a way
    /// that would make a directory its own descendant. Anything else keeps the target where it
    /// is.
    fn splice(&self, dir: &Arc<Dentry>, resolved: DentryPin) -> DentryPin {
        let Some(old_parent) = resolved.parent() else {
            return resolved;
        };
        if Arc::ptr_eq(&old_parent, dir) || resolved.is_mount_root() {
            return resolved;
        }
        let Some(sb) = dir.superblock() else {
            return resolved;
        };
        if !resolved.superblock().is_some_and(|s| Arc::ptr_eq(&s, &sb))
            || is_ancestor(&resolved, dir)
        {
            return resolved;
        }

        let _rename_guard = sb.rename_lock();
        let _parent_guards = self.lock_two(&old_parent, dir);
        let target = Arc::clone(&resolved);
        let _guard = self.dcache.lock(&target);

        let moved_meanwhile = !target.parent().is_some_and(|p| Arc::ptr_eq(&p, &old_parent));
        if moved_meanwhile || target.ref_count() != 2 || target.has_children() {
            return resolved;
        }
        if self.dcache.lookup(dir, &target.name()).is_some() {
            return resolved;
        }

        drop(resolved);
        self.dcache.rehash(dir, &target, None);
        trace!(dentry = ?target.id(), dir = ?dir.id(), "spliced symlink target");
        DentryPin::new(Arc::clone(&target))
    }
}
