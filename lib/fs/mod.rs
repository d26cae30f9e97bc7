//! The virtual filesystem core.
//!
//! Everything hangs off a [`Vfs`] context: the dentry cache, the inode cache, their LRU zones and
//! the global root. Filesystems plug in through the traits in [`backend`].

/// Backend operation contract implemented by each filesystem kind.
pub mod backend;
/// Directory-entry cache.
pub mod dcache;
/// Dentries and walk pins.
pub mod dentry;
mod error;
/// Open files, descriptor tables and per-process state.
pub mod file;
/// Hashed path components.
pub mod hstr;
/// Inodes and the inode cache.
pub mod inode;
/// Mounts and busy tracking.
pub mod mount;
/// Write-back page cache for regular files.
pub mod pcache;
/// A complete in-memory filesystem.
pub mod ramfs;
/// Superblocks.
pub mod superblock;
mod syscall;
mod vfs;
mod walk;

pub use dentry::{Dentry, DentryId, DentryPin};
pub use error::{VfsError, VfsResult};
pub use file::{Fd, OpenFile, Process};
pub use hstr::HStr;
pub use inode::{Inode, InodeCache};
pub use mount::Mount;
pub use superblock::{Superblock, SuperblockId};
pub use vfs::Vfs;
pub use walk::Walked;

use std::time::SystemTime;

use bitflags::bitflags;

/// Numeric inode identifier, unique within one superblock.
pub type InodeId = u64;

/// The type of an inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InodeKind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
    /// A symbolic link.
    Symlink,
    /// A character-style device read and written sequentially. Bypasses the page cache.
    SeqDevice,
    /// A block-style device addressed by offset.
    VolumeDevice,
}

impl InodeKind {
    /// Whether this is a directory.
    #[must_use]
    pub fn is_dir(self) -> bool {
        self == Self::Directory
    }

    /// Whether this is a symbolic link.
    #[must_use]
    pub fn is_symlink(self) -> bool {
        self == Self::Symlink
    }

    /// Whether reads and writes of this kind go through the page cache.
    #[must_use]
    pub fn is_cacheable(self) -> bool {
        matches!(self, Self::File | Self::VolumeDevice)
    }
}

bitflags! {
    /// Flags accepted by [`Vfs::open`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpenFlags: u32 {
        /// Create the file if it does not exist.
        const CREATE = 1 << 0;
        /// Start at the end of the file.
        const APPEND = 1 << 1;
        /// Bypass the page cache.
        const DIRECT = 1 << 2;
    }
}

bitflags! {
    /// Options steering a path walk.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WalkFlags: u32 {
        /// A leading separator resolves against the start dentry's superblock root instead of
        /// the global root.
        const FSRELATIVE = 1 << 0;
        /// Stop one component short and hand the last component back unresolved.
        const PARENT = 1 << 1;
        /// Ask the backend to create the last resolved component as a directory if it is
        /// missing.
        const MKPARENT = 1 << 2;
        /// Do not dereference a symlink at the final component.
        const NOFOLLOW = 1 << 3;
    }
}

bitflags! {
    /// Superblock flags chosen at mount time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MountFlags: u32 {
        /// Reject every structural mutation and write.
        const READ_ONLY = 1 << 0;
    }
}

/// Reference point for [`Vfs::lseek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeekWhence {
    /// Absolute offset.
    Set,
    /// Relative to the current position.
    Cur,
    /// Relative to the end of the file.
    End,
}

/// Inode metadata as returned by [`Vfs::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// Inode id within its superblock.
    pub id: InodeId,
    /// Owning superblock.
    pub superblock: SuperblockId,
    /// Inode type.
    pub kind: InodeKind,
    /// Size in bytes.
    pub size: u64,
    /// Number of cached dentries naming the inode.
    pub link_count: u32,
    /// Number of open files on the inode.
    pub open_count: u32,
    /// Last access.
    pub accessed: SystemTime,
    /// Last modification.
    pub modified: SystemTime,
    /// Creation.
    pub created: SystemTime,
}

/// One directory entry filled in by [`Vfs::readdir`].
///
/// `offset` is the caller's cursor: offsets 0 and 1 yield the synthetic `.` and `..` entries,
/// higher offsets are handed to the backend shifted down by two.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dirent {
    /// Position of the next entry to read.
    pub offset: u64,
    /// Name of the last entry read.
    pub name: String,
    /// Type of the last entry read, if the backend reported one.
    pub kind: Option<InodeKind>,
}
