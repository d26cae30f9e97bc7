//! Mounts and busy tracking.
//!
//! A mount binds a superblock to the dentry it was mounted on. That dentry becomes the
//! superblock's root; its previous identity is stashed in the mount and restored on unmount.
//!
//! The busy counter is raised for every open file and every working directory inside the mount.
//! Unmount is refused while it is non-zero.

use std::fmt;

use crate::sync::atomic::{AtomicU32, Ordering};
use crate::sync::{Arc, Mutex};

use super::dentry::Dentry;
use super::inode::Inode;
use super::superblock::Superblock;

/// What a mount point looked like before something was mounted on it.
pub(crate) struct Covered {
    pub(crate) inode: Option<Arc<Inode>>,
    pub(crate) superblock: Option<Arc<Superblock>>,
    pub(crate) mount: Option<Arc<Mount>>,
}

/// One mounted filesystem instance.
pub struct Mount {
    superblock: Arc<Superblock>,
    root: Arc<Dentry>,
    parent: Option<Arc<Mount>>,
    busy: AtomicU32,
    submounts: AtomicU32,
    covered: Mutex<Option<Covered>>,
}

impl fmt::Debug for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mount")
            .field("superblock", &self.superblock.id())
            .field("root", &self.root.id())
            .field("busy", &self.busy())
            .field("submounts", &self.submounts())
            .finish_non_exhaustive()
    }
}

impl Mount {
    pub(crate) fn new(
        superblock: Arc<Superblock>,
        root: Arc<Dentry>,
        parent: Option<Arc<Mount>>,
        covered: Covered,
    ) -> Arc<Self> {
        if let Some(parent) = &parent {
            parent.submounts.fetch_add(1, Ordering::AcqRel);
        }
        Arc::new(Self {
            superblock,
            root,
            parent,
            busy: AtomicU32::new(0),
            submounts: AtomicU32::new(0),
            covered: Mutex::new(Some(covered)),
        })
    }

    /// The mounted superblock.
    #[must_use]
    pub fn superblock(&self) -> &Arc<Superblock> {
        &self.superblock
    }

    /// The dentry the superblock is mounted on.
    #[must_use]
    pub fn root(&self) -> &Arc<Dentry> {
        &self.root
    }

    /// The enclosing mount, or `None` for the root mount.
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<Mount>> {
        self.parent.as_ref()
    }

    /// Pin the mount: something inside it is open or is a working directory.
    pub fn mkbusy(&self) {
        self.busy.fetch_add(1, Ordering::AcqRel);
    }

    /// Undo one [`Mount::mkbusy`].
    pub fn chillax(&self) {
        let prev = self.busy.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "mount busy count underflow");
    }

    /// Current busy count.
    #[must_use]
    pub fn busy(&self) -> u32 {
        self.busy.load(Ordering::Acquire)
    }

    /// Number of mounts stacked directly inside this one.
    #[must_use]
    pub fn submounts(&self) -> u32 {
        self.submounts.load(Ordering::Acquire)
    }

    pub(crate) fn take_covered(&self) -> Option<Covered> {
        self.covered.lock().take()
    }

    pub(crate) fn detach_from_parent(&self) {
        if let Some(parent) = &self.parent {
            parent.submounts.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Pin the mount `dentry` belongs to, returning it so the matching [`chillax`] releases the
/// same mount even if the dentry is later covered by another one.
pub(crate) fn mkbusy(dentry: &Dentry) -> Option<Arc<Mount>> {
    let mount = dentry.mount();
    if let Some(mount) = &mount {
        mount.mkbusy();
    }
    mount
}

/// Release a pin taken by [`mkbusy`].
pub(crate) fn chillax(mount: Option<&Arc<Mount>>) {
    if let Some(mount) = mount {
        mount.chillax();
    }
}
