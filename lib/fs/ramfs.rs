//! An in-memory filesystem.
//!
//! Each mount gets its own node table. Directory entries are kept sorted, so `readdir` is
//! stable across calls. [`RamFsStats`] counts backend calls across every instance of one
//! [`RamFs`] factory.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::sync::atomic::{AtomicU64, Ordering};
use crate::sync::{Arc, Mutex, Weak};

use super::backend::{DirContext, FileOps, Filesystem, InodeInit, InodeOps, SuperOps};
use super::dentry::Dentry;
use super::error::{VfsError, VfsResult};
use super::file::OpenFile;
use super::inode::Inode;
use super::superblock::Superblock;
use super::{InodeId, InodeKind};

const ROOT_ID: InodeId = 1;
const MAX_FILE_SIZE: u64 = 1 << 32;

/// Counters of backend calls.
#[derive(Debug, Default)]
pub struct RamFsStats {
    lookups: AtomicU64,
    creates: AtomicU64,
    removals: AtomicU64,
    renames: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    syncs: AtomicU64,
}

impl RamFsStats {
    /// `dir_lookup` calls.
    #[must_use]
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    /// `create` and `mkdir` calls.
    #[must_use]
    pub fn creates(&self) -> u64 {
        self.creates.load(Ordering::Relaxed)
    }

    /// `unlink` and `rmdir` calls.
    #[must_use]
    pub fn removals(&self) -> u64 {
        self.removals.load(Ordering::Relaxed)
    }

    /// `rename` calls.
    #[must_use]
    pub fn renames(&self) -> u64 {
        self.renames.load(Ordering::Relaxed)
    }

    /// File `read` calls.
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// File `write` calls.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Inode and file `sync` calls.
    #[must_use]
    pub fn syncs(&self) -> u64 {
        self.syncs.load(Ordering::Relaxed)
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The `ramfs` filesystem kind.
#[derive(Debug, Default)]
pub struct RamFs {
    stats: Arc<RamFsStats>,
}

impl RamFs {
    /// Name under which the filesystem registers.
    pub const NAME: &'static str = "ramfs";

    /// Creates a factory with fresh counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters shared by every instance mounted from this factory.
    #[must_use]
    pub fn stats(&self) -> &Arc<RamFsStats> {
        &self.stats
    }
}

impl Filesystem for RamFs {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn instantiate(&self) -> VfsResult<Arc<dyn SuperOps>> {
        Ok(RamInstance::new(Arc::clone(&self.stats)))
    }
}

enum NodeData {
    File(Vec<u8>),
    Dir(BTreeMap<String, InodeId>),
    Symlink(String),
}

struct RamNode {
    data: NodeData,
    nlink: u32,
}

impl RamNode {
    fn kind(&self) -> InodeKind {
        match self.data {
            NodeData::File(_) => InodeKind::File,
            NodeData::Dir(_) => InodeKind::Directory,
            NodeData::Symlink(_) => InodeKind::Symlink,
        }
    }

    fn size(&self) -> u64 {
        match &self.data {
            NodeData::File(bytes) => bytes.len() as u64,
            NodeData::Dir(entries) => entries.len() as u64,
            NodeData::Symlink(target) => target.len() as u64,
        }
    }
}

/// One mounted ramfs. The node table lock is never held while calling into the VFS, since
/// allocating an inode may reclaim others and re-enter [`InodeOps::sync`].
struct RamInstance {
    me: Weak<RamInstance>,
    stats: Arc<RamFsStats>,
    nodes: Mutex<FxHashMap<InodeId, RamNode>>,
    publish: Mutex<()>,
    next_id: AtomicU64,
}

impl RamInstance {
    fn new(stats: Arc<RamFsStats>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            stats,
            nodes: Mutex::new(FxHashMap::default()),
            publish: Mutex::new(()),
            next_id: AtomicU64::new(ROOT_ID + 1),
        })
    }

    /// The cached inode for `id`, or a fresh one filled from the node table.
    fn materialize(&self, sb: &Arc<Superblock>, id: InodeId) -> VfsResult<Arc<Inode>> {
        let _publish = self.publish.lock();
        if let Some(inode) = sb.find_inode(id) {
            return Ok(inode);
        }
        let (kind, size) = {
            let nodes = self.nodes.lock();
            let node = nodes.get(&id).ok_or(VfsError::NotFound)?;
            (node.kind(), node.size())
        };
        let inode = sb.alloc_inode()?;
        inode.set_id(id);
        inode.set_kind(kind);
        inode.set_size(size);
        sb.hash_inode(&inode);
        trace!(id, ?kind, "materialized ramfs inode");
        Ok(inode)
    }

    /// Id of the directory a dentry is (about to be) linked under.
    fn parent_id(dentry: &Dentry) -> VfsResult<InodeId> {
        dentry
            .parent()
            .and_then(|p| p.inode())
            .map(|i| i.id())
            .ok_or(VfsError::NotFound)
    }

    fn entries_mut(
        nodes: &mut FxHashMap<InodeId, RamNode>,
        dir: InodeId,
    ) -> VfsResult<&mut BTreeMap<String, InodeId>> {
        match nodes.get_mut(&dir).map(|n| &mut n.data) {
            Some(NodeData::Dir(entries)) => Ok(entries),
            Some(_) => Err(VfsError::NotADirectory),
            None => Err(VfsError::NotFound),
        }
    }

    fn make(&self, dir: &Arc<Inode>, dentry: &Dentry, data: NodeData) -> VfsResult<()> {
        RamFsStats::bump(&self.stats.creates);
        let name = dentry.name();
        let id = {
            let mut nodes = self.nodes.lock();
            let entries = Self::entries_mut(&mut nodes, dir.id())?;
            if entries.contains_key(name.as_str()) {
                return Err(VfsError::AlreadyExists);
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            entries.insert(name.as_str().to_owned(), id);
            nodes.insert(id, RamNode { data, nlink: 1 });
            id
        };
        let inode = self.materialize(dir.superblock(), id)?;
        dentry.assign_inode(inode);
        Ok(())
    }

    /// Drop one link to `id`, deleting the node with its last link.
    fn drop_link(nodes: &mut FxHashMap<InodeId, RamNode>, id: InodeId) {
        if let Some(node) = nodes.get_mut(&id) {
            node.nlink = node.nlink.saturating_sub(1);
            if node.nlink == 0 {
                nodes.remove(&id);
            }
        }
    }

    fn remove(&self, dir: &Arc<Inode>, dentry: &Dentry, want_dir: bool) -> VfsResult<()> {
        RamFsStats::bump(&self.stats.removals);
        let name = dentry.name();
        let mut nodes = self.nodes.lock();
        let id = *Self::entries_mut(&mut nodes, dir.id())?
            .get(name.as_str())
            .ok_or(VfsError::NotFound)?;
        match (nodes.get(&id).map(|n| &n.data), want_dir) {
            (None, _) => return Err(VfsError::NotFound),
            (Some(NodeData::Dir(entries)), true) if !entries.is_empty() => {
                return Err(VfsError::NotEmpty);
            }
            (Some(NodeData::Dir(_)), false) => return Err(VfsError::IsADirectory),
            (Some(NodeData::File(_) | NodeData::Symlink(_)), true) => {
                return Err(VfsError::NotADirectory);
            }
            _ => {}
        }
        Self::entries_mut(&mut nodes, dir.id())?.remove(name.as_str());
        Self::drop_link(&mut nodes, id);
        Ok(())
    }

    fn arc(&self) -> Option<Arc<Self>> {
        self.me.upgrade()
    }
}

impl SuperOps for RamInstance {
    fn init_inode(&self, _sb: &Superblock, inode: &mut InodeInit) {
        if let Some(me) = self.arc() {
            inode.ops = Arc::clone(&me) as Arc<dyn InodeOps>;
            inode.fops = me;
        }
    }

    fn max_file_size(&self) -> u64 {
        MAX_FILE_SIZE
    }

    fn mount_root(&self, sb: &Arc<Superblock>) -> VfsResult<Arc<Inode>> {
        self.nodes.lock().insert(
            ROOT_ID,
            RamNode {
                data: NodeData::Dir(BTreeMap::new()),
                nlink: 1,
            },
        );
        self.materialize(sb, ROOT_ID)
    }
}

impl InodeOps for RamInstance {
    fn dir_lookup(&self, dir: &Arc<Inode>, dentry: &Dentry) -> VfsResult<()> {
        RamFsStats::bump(&self.stats.lookups);
        let name = dentry.name();
        let id = {
            let mut nodes = self.nodes.lock();
            *Self::entries_mut(&mut nodes, dir.id())?
                .get(name.as_str())
                .ok_or(VfsError::NotFound)?
        };
        let inode = self.materialize(dir.superblock(), id)?;
        dentry.assign_inode(inode);
        Ok(())
    }

    fn create(&self, dir: &Arc<Inode>, dentry: &Dentry) -> VfsResult<()> {
        self.make(dir, dentry, NodeData::File(Vec::new()))
    }

    fn mkdir(&self, dir: &Arc<Inode>, dentry: &Dentry) -> VfsResult<()> {
        self.make(dir, dentry, NodeData::Dir(BTreeMap::new()))
    }

    fn rmdir(&self, dir: &Arc<Inode>, dentry: &Dentry) -> VfsResult<()> {
        self.remove(dir, dentry, true)
    }

    fn unlink(&self, dir: &Arc<Inode>, dentry: &Dentry) -> VfsResult<()> {
        self.remove(dir, dentry, false)
    }

    fn link(&self, inode: &Arc<Inode>, new_name: &Dentry) -> VfsResult<()> {
        if inode.kind().is_dir() {
            return Err(VfsError::Backend(libc::EPERM));
        }
        let parent = Self::parent_id(new_name)?;
        let name = new_name.name();
        let mut nodes = self.nodes.lock();
        let entries = Self::entries_mut(&mut nodes, parent)?;
        if entries.contains_key(name.as_str()) {
            return Err(VfsError::AlreadyExists);
        }
        entries.insert(name.as_str().to_owned(), inode.id());
        let node = nodes.get_mut(&inode.id()).ok_or(VfsError::NotFound)?;
        node.nlink += 1;
        Ok(())
    }

    fn rename(&self, inode: &Arc<Inode>, src: &Dentry, dst: &Dentry) -> VfsResult<()> {
        RamFsStats::bump(&self.stats.renames);
        let (src_dir, dst_dir) = (Self::parent_id(src)?, Self::parent_id(dst)?);
        let (src_name, dst_name) = (src.name(), dst.name());

        let mut nodes = self.nodes.lock();
        let replaced = Self::entries_mut(&mut nodes, dst_dir)?
            .get(dst_name.as_str())
            .copied();
        if let Some(old) = replaced
            && let Some(NodeData::Dir(entries)) = nodes.get(&old).map(|n| &n.data)
            && !entries.is_empty()
        {
            return Err(VfsError::NotEmpty);
        }
        Self::entries_mut(&mut nodes, src_dir)?.remove(src_name.as_str());
        Self::entries_mut(&mut nodes, dst_dir)?.insert(dst_name.as_str().to_owned(), inode.id());
        if let Some(old) = replaced {
            Self::drop_link(&mut nodes, old);
        }
        Ok(())
    }

    fn read_symlink(&self, inode: &Arc<Inode>) -> VfsResult<String> {
        match self.nodes.lock().get(&inode.id()).map(|n| &n.data) {
            Some(NodeData::Symlink(target)) => Ok(target.clone()),
            Some(_) => Err(VfsError::InvalidArgument),
            None => Err(VfsError::NotFound),
        }
    }

    fn set_symlink(&self, inode: &Arc<Inode>, target: &str) -> VfsResult<()> {
        let mut nodes = self.nodes.lock();
        let node = nodes.get_mut(&inode.id()).ok_or(VfsError::NotFound)?;
        if node.kind().is_dir() {
            return Err(VfsError::IsADirectory);
        }
        node.data = NodeData::Symlink(target.to_owned());
        inode.set_kind(InodeKind::Symlink);
        inode.set_size(target.len() as u64);
        Ok(())
    }

    fn open(&self, inode: &Arc<Inode>, _file: &OpenFile) -> VfsResult<()> {
        if self.nodes.lock().contains_key(&inode.id()) {
            Ok(())
        } else {
            Err(VfsError::NotFound)
        }
    }

    fn sync(&self, _inode: &Arc<Inode>) -> VfsResult<()> {
        RamFsStats::bump(&self.stats.syncs);
        Ok(())
    }
}

impl FileOps for RamInstance {
    fn read(&self, inode: &Arc<Inode>, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
        RamFsStats::bump(&self.stats.reads);
        let nodes = self.nodes.lock();
        let bytes = match nodes.get(&inode.id()).map(|n| &n.data) {
            Some(NodeData::File(bytes)) => bytes,
            Some(NodeData::Dir(_)) => return Err(VfsError::IsADirectory),
            Some(NodeData::Symlink(_)) => return Err(VfsError::InvalidArgument),
            None => return Err(VfsError::NotFound),
        };
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= bytes.len() {
            return Ok(0);
        }
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        Ok(n)
    }

    fn write(&self, inode: &Arc<Inode>, buf: &[u8], offset: u64) -> VfsResult<usize> {
        RamFsStats::bump(&self.stats.writes);
        let end = offset
            .checked_add(buf.len() as u64)
            .filter(|&end| end <= MAX_FILE_SIZE)
            .ok_or(VfsError::Backend(libc::EFBIG))?;
        let (Ok(start), Ok(end)) = (usize::try_from(offset), usize::try_from(end)) else {
            return Err(VfsError::Backend(libc::EFBIG));
        };
        let mut nodes = self.nodes.lock();
        let bytes = match nodes.get_mut(&inode.id()).map(|n| &mut n.data) {
            Some(NodeData::File(bytes)) => bytes,
            Some(NodeData::Dir(_)) => return Err(VfsError::IsADirectory),
            Some(NodeData::Symlink(_)) => return Err(VfsError::InvalidArgument),
            None => return Err(VfsError::NotFound),
        };
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn readdir(&self, file: &OpenFile, ctx: &mut DirContext<'_>) -> VfsResult<bool> {
        let nodes = self.nodes.lock();
        let Some(NodeData::Dir(entries)) = nodes.get(&file.inode().id()).map(|n| &n.data) else {
            return Err(VfsError::NotADirectory);
        };
        let Some((name, id)) = usize::try_from(ctx.index())
            .ok()
            .and_then(|i| entries.iter().nth(i))
        else {
            return Ok(false);
        };
        let kind = nodes.get(id).map_or(InodeKind::File, RamNode::kind);
        ctx.emit(name, kind);
        Ok(true)
    }

    fn sync(&self, _file: &OpenFile) -> VfsResult<()> {
        RamFsStats::bump(&self.stats.syncs);
        Ok(())
    }
}
