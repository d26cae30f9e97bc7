//! Open files, descriptor tables and per-process state.

use std::fmt;

use crate::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use crate::sync::Arc;

use super::OpenFlags;
use super::backend::FileOps;
use super::dentry::Dentry;
use super::error::{VfsError, VfsResult};
use super::inode::Inode;
use super::mount::Mount;

/// A dentry/inode pair opened for I/O, with its own cursor.
///
/// Shared between descriptors created by `dup`; `ref_count` counts them.
pub struct OpenFile {
    dentry: Arc<Dentry>,
    inode: Arc<Inode>,
    ops: Arc<dyn FileOps>,
    mount: Option<Arc<Mount>>,
    pos: AtomicU64,
    ref_count: AtomicU32,
}

impl fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenFile")
            .field("dentry", &self.dentry.id())
            .field("inode", &self.inode.id())
            .field("pos", &self.position())
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}

impl OpenFile {
    pub(crate) fn new(dentry: Arc<Dentry>, inode: Arc<Inode>) -> Self {
        let ops = Arc::clone(inode.fops());
        let mount = dentry.mount();
        Self {
            dentry,
            inode,
            ops,
            mount,
            pos: AtomicU64::new(0),
            ref_count: AtomicU32::new(1),
        }
    }

    /// The opened dentry.
    #[must_use]
    pub fn dentry(&self) -> &Arc<Dentry> {
        &self.dentry
    }

    /// The opened inode.
    #[must_use]
    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    /// File operations.
    #[must_use]
    pub fn ops(&self) -> &Arc<dyn FileOps> {
        &self.ops
    }

    /// The mount pinned by this file.
    pub(crate) fn mount(&self) -> Option<&Arc<Mount>> {
        self.mount.as_ref()
    }

    /// Current offset.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.pos.load(Ordering::Acquire)
    }

    pub(crate) fn set_position(&self, pos: u64) {
        self.pos.store(pos, Ordering::Release);
    }

    /// Number of descriptors sharing this file.
    #[must_use]
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub(crate) fn share(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one descriptor's share. Returns `true` if other descriptors still hold the file.
    pub(crate) fn unshare(&self) -> bool {
        self.ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 1).then_some(n - 1)
            })
            .is_ok()
    }
}

/// A small-integer handle into a [`Process`]'s descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(pub usize);

/// One descriptor: the shared open file plus descriptor-local flags.
#[derive(Debug, Clone)]
pub struct FdEntry {
    /// The open file.
    pub file: Arc<OpenFile>,
    /// Flags given at open time.
    pub flags: OpenFlags,
}

/// Fixed-size descriptor table.
#[derive(Debug)]
pub struct FdTable {
    slots: Vec<Option<FdEntry>>,
}

impl FdTable {
    /// Creates a table with `max` slots.
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(max).collect(),
        }
    }

    /// The entry at `fd`, or [`VfsError::BadDescriptor`].
    pub fn get(&self, fd: Fd) -> VfsResult<&FdEntry> {
        self.slots
            .get(fd.0)
            .and_then(Option::as_ref)
            .ok_or(VfsError::BadDescriptor)
    }

    /// Lowest free descriptor.
    pub fn lowest_free(&self) -> VfsResult<Fd> {
        self.slots
            .iter()
            .position(Option::is_none)
            .map(Fd)
            .ok_or(VfsError::TooManyOpenFiles)
    }

    /// Put `entry` at `fd`, returning what was there.
    pub fn install(&mut self, fd: Fd, entry: FdEntry) -> VfsResult<Option<FdEntry>> {
        let slot = self.slots.get_mut(fd.0).ok_or(VfsError::BadDescriptor)?;
        Ok(slot.replace(entry))
    }

    /// Empty the slot at `fd`.
    pub fn take(&mut self, fd: Fd) -> VfsResult<FdEntry> {
        self.slots
            .get_mut(fd.0)
            .and_then(Option::take)
            .ok_or(VfsError::BadDescriptor)
    }

    /// Number of open descriptors.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Every open descriptor.
    #[must_use]
    pub fn open_fds(&self) -> Vec<Fd> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| Fd(i)))
            .collect()
    }
}

/// Per-process VFS state: working directory and descriptor table.
#[derive(Debug)]
pub struct Process {
    pub(crate) cwd: Option<Arc<Dentry>>,
    pub(crate) cwd_mount: Option<Arc<Mount>>,
    pub(crate) fds: FdTable,
}

impl Process {
    /// A process with no working directory (paths resolve from the root) and `max_fds`
    /// descriptor slots.
    #[must_use]
    pub fn new(max_fds: usize) -> Self {
        Self {
            cwd: None,
            cwd_mount: None,
            fds: FdTable::new(max_fds),
        }
    }

    /// Working directory, if one was set.
    #[must_use]
    pub fn cwd(&self) -> Option<&Arc<Dentry>> {
        self.cwd.as_ref()
    }

    /// Descriptor table.
    #[must_use]
    pub fn fds(&self) -> &FdTable {
        &self.fds
    }
}
