//! The contract between the VFS core and concrete filesystems.
//!
//! A filesystem kind registers a [`Filesystem`] factory. Mounting it produces a [`SuperOps`]
//! instance, which in turn hands every inode an [`InodeOps`] and a [`FileOps`] table. Every
//! method has a default that reports [`VfsError::Unsupported`], so a backend only implements what
//! it supports.

use crate::sync::Arc;

use super::dentry::Dentry;
use super::error::{VfsError, VfsResult};
use super::file::OpenFile;
use super::inode::Inode;
use super::superblock::Superblock;
use super::{InodeId, InodeKind};

/// A mountable filesystem kind.
pub trait Filesystem: Send + Sync {
    /// Name used to select this filesystem in [`crate::fs::Vfs::mount`].
    fn name(&self) -> &str;

    /// Creates a fresh instance to back one superblock.
    fn instantiate(&self) -> VfsResult<Arc<dyn SuperOps>>;
}

/// Per-superblock backend operations.
pub trait SuperOps: Send + Sync {
    /// Fill in a freshly allocated inode before it is published.
    fn init_inode(&self, sb: &Superblock, inode: &mut InodeInit);

    /// Produce the root directory inode. Called once, right after the superblock is created.
    fn mount_root(&self, sb: &Arc<Superblock>) -> VfsResult<Arc<Inode>>;

    /// Largest offset a file on this superblock may reach. Writes past it fail with `EFBIG`.
    fn max_file_size(&self) -> u64 {
        u64::MAX >> 1
    }

    /// Called after every inode of the superblock has been synced and dropped.
    fn unmount(&self, _sb: &Superblock) -> VfsResult<()> {
        Ok(())
    }
}

/// Initial state of an inode, populated by [`SuperOps::init_inode`].
pub struct InodeInit {
    /// Backend id. May be left at zero and assigned later with [`Inode::set_id`].
    pub id: InodeId,
    /// Inode type.
    pub kind: InodeKind,
    /// Size in bytes.
    pub size: u64,
    /// Inode operations.
    pub ops: Arc<dyn InodeOps>,
    /// Default operations for files opened on this inode.
    pub fops: Arc<dyn FileOps>,
}

impl Default for InodeInit {
    fn default() -> Self {
        Self {
            id: 0,
            kind: InodeKind::File,
            size: 0,
            ops: Arc::new(NoOps),
            fops: Arc::new(NoOps),
        }
    }
}

/// Operations on an inode.
///
/// Directory operations receive the directory inode and the dentry naming the child. A backend
/// that resolves or creates a child binds it with [`Dentry::assign_inode`].
pub trait InodeOps: Send + Sync {
    /// Resolve `dentry`'s name inside `dir`. Returns [`VfsError::NotFound`] if there is no such
    /// entry.
    fn dir_lookup(&self, _dir: &Arc<Inode>, _dentry: &Dentry) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }

    /// Create a regular file named by `dentry` inside `dir`.
    fn create(&self, _dir: &Arc<Inode>, _dentry: &Dentry) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }

    /// Create a directory named by `dentry` inside `dir`.
    fn mkdir(&self, _dir: &Arc<Inode>, _dentry: &Dentry) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }

    /// Remove the empty directory named by `dentry` from `dir`.
    fn rmdir(&self, _dir: &Arc<Inode>, _dentry: &Dentry) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }

    /// Remove the non-directory entry named by `dentry` from `dir`.
    fn unlink(&self, _dir: &Arc<Inode>, _dentry: &Dentry) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }

    /// Add `new_name` (whose parent is already set) as another name for `inode`.
    fn link(&self, _inode: &Arc<Inode>, _new_name: &Dentry) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }

    /// Move `inode` from `src` to `dst`, replacing whatever `dst` names.
    fn rename(&self, _inode: &Arc<Inode>, _src: &Dentry, _dst: &Dentry) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }

    /// Read a symlink target.
    fn read_symlink(&self, _inode: &Arc<Inode>) -> VfsResult<String> {
        Err(VfsError::Unsupported)
    }

    /// Turn `inode` into a symlink pointing at `target`.
    fn set_symlink(&self, _inode: &Arc<Inode>, _target: &str) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }

    /// Prepare `file` for I/O.
    fn open(&self, _inode: &Arc<Inode>, _file: &OpenFile) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }

    /// Persist inode state. Runs before the inode cache reclaims the inode.
    fn sync(&self, _inode: &Arc<Inode>) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }
}

/// Operations on an open file.
pub trait FileOps: Send + Sync {
    /// Release backend state for `file`.
    fn close(&self, _file: &OpenFile) -> VfsResult<()> {
        Ok(())
    }

    /// Read up to `buf.len()` bytes at `offset`.
    fn read(&self, _inode: &Arc<Inode>, _buf: &mut [u8], _offset: u64) -> VfsResult<usize> {
        Err(VfsError::Unsupported)
    }

    /// Write `buf` at `offset`.
    fn write(&self, _inode: &Arc<Inode>, _buf: &[u8], _offset: u64) -> VfsResult<usize> {
        Err(VfsError::Unsupported)
    }

    /// Notified before the file position moves to `offset`.
    fn seek(&self, _inode: &Arc<Inode>, _offset: u64) -> VfsResult<()> {
        Ok(())
    }

    /// Emit the entry at `ctx.index()` through [`DirContext::emit`]. Returns `true` if an entry
    /// was produced, `false` once the directory is exhausted.
    fn readdir(&self, _file: &OpenFile, _ctx: &mut DirContext<'_>) -> VfsResult<bool> {
        Err(VfsError::Unsupported)
    }

    /// Flush file state to stable storage.
    fn sync(&self, _file: &OpenFile) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }
}

/// Operation table that supports nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOps;

impl InodeOps for NoOps {}
impl FileOps for NoOps {}

/// Directory-enumeration context handed to [`FileOps::readdir`].
pub struct DirContext<'a> {
    index: u64,
    sink: &'a mut dyn FnMut(&str, InodeKind),
}

impl<'a> DirContext<'a> {
    /// Creates a context asking for the entry at `index`, delivering it to `sink`.
    pub fn new(index: u64, sink: &'a mut dyn FnMut(&str, InodeKind)) -> Self {
        Self { index, sink }
    }

    /// Backend-relative index of the requested entry.
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Deliver one entry.
    pub fn emit(&mut self, name: &str, kind: InodeKind) {
        (self.sink)(name, kind);
    }
}
