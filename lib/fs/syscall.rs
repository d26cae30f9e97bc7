//! Process-facing entry points: descriptor I/O, namespace operations and working directories.
//!
//! Relative paths resolve against the process's working directory, or the global root if it
//! has none.

use tracing::{instrument, warn};

use crate::sync::Arc;

use super::backend::DirContext;
use super::dentry::{Dentry, DentryPin};
use super::error::{VfsError, VfsResult};
use super::file::{Fd, FdEntry, OpenFile, Process};
use super::hstr::HStr;
use super::mount::{self, Mount};
use super::vfs::Vfs;
use super::walk::Walked;
use super::{Dirent, InodeKind, Metadata, MountFlags, OpenFlags, SeekWhence, WalkFlags};

impl Vfs {
    fn file_of(proc: &Process, fd: Fd) -> VfsResult<(Arc<OpenFile>, OpenFlags)> {
        let entry = proc.fds.get(fd)?;
        Ok((Arc::clone(&entry.file), entry.flags))
    }

    /// Walk `path` for its parent and the trailing name, failing [`VfsError::AlreadyExists`]
    /// if the name is taken.
    fn parent_of_new(
        &self,
        start: Option<&Arc<Dentry>>,
        path: &str,
    ) -> VfsResult<(DentryPin, HStr)> {
        let Walked { dentry, trailing } = self.walk(start, path, WalkFlags::PARENT)?;
        let name = trailing.ok_or(VfsError::AlreadyExists)?;
        if name.is_dot() || name.is_dotdot() {
            return Err(VfsError::AlreadyExists);
        }
        match self.walk(Some(&*dentry), name.as_str(), WalkFlags::NOFOLLOW) {
            Ok(_) => Err(VfsError::AlreadyExists),
            Err(VfsError::NotFound) => Ok((dentry, name)),
            Err(e) => Err(e),
        }
    }

    /// Find the file `path` names, creating it with the backend's `create` if it is missing
    /// and `create` is set.
    fn locate(
        &self,
        start: Option<&Arc<Dentry>>,
        path: &str,
        create: bool,
    ) -> VfsResult<DentryPin> {
        let Walked { dentry: parent, trailing } = self.walk(start, path, WalkFlags::PARENT)?;
        let Some(name) = trailing else {
            return Ok(parent);
        };
        match self.walk(Some(&*parent), name.as_str(), WalkFlags::empty()) {
            Ok(found) => Ok(found.dentry),
            Err(VfsError::NotFound) if create => {
                self.create_child(&parent, name, |dir, d| dir.ops().create(dir, d))
            }
            Err(e) => Err(e),
        }
    }

    /// Open `path` and install it in the lowest free descriptor.
    #[instrument(name = "Vfs::open", level = "debug", skip(self, proc))]
    pub fn open(&self, proc: &mut Process, path: &str, flags: OpenFlags) -> VfsResult<Fd> {
        let fd = proc.fds.lowest_free()?;
        let dentry = self.locate(proc.cwd(), path, flags.contains(OpenFlags::CREATE))?;
        let file = self.open_dentry(&dentry)?;
        if flags.contains(OpenFlags::APPEND) {
            file.set_position(file.inode().size());
        }
        proc.fds.install(fd, FdEntry { file, flags })?;
        Ok(fd)
    }

    /// Drop one descriptor's share of its file, closing it with the last one.
    fn release(&self, file: &Arc<OpenFile>) -> VfsResult<()> {
        if file.unshare() {
            Ok(())
        } else {
            self.close_file(file)
        }
    }

    /// Close `fd`.
    pub fn close(&self, proc: &mut Process, fd: Fd) -> VfsResult<()> {
        let (file, _) = Self::file_of(proc, fd)?;
        self.release(&file)?;
        proc.fds.take(fd)?;
        Ok(())
    }

    /// Read from `fd` at its position, advancing it.
    pub fn read(&self, proc: &Process, fd: Fd, buf: &mut [u8]) -> VfsResult<usize> {
        let (file, flags) = Self::file_of(proc, fd)?;
        let inode = file.inode();
        if inode.kind().is_dir() {
            return Err(VfsError::IsADirectory);
        }

        let _guard = self.lock_inode(inode);
        inode.mark_accessed();
        let pos = file.position();
        let read = if flags.contains(OpenFlags::DIRECT) || !inode.kind().is_cacheable() {
            if let Some(pcache) = inode.page_cache() {
                pcache.commit_all(inode)?;
                pcache.release();
            }
            file.ops().read(inode, buf, pos)?
        } else {
            inode
                .attach_page_cache(self.config.page_size)
                .read(inode, buf, pos)?
        };
        file.set_position(pos + read as u64);
        Ok(read)
    }

    /// Write to `fd` at its position (or the end of the file under `APPEND`), advancing it.
    pub fn write(&self, proc: &Process, fd: Fd, buf: &[u8]) -> VfsResult<usize> {
        let (file, flags) = Self::file_of(proc, fd)?;
        let inode = file.inode();
        if inode.kind().is_dir() {
            return Err(VfsError::IsADirectory);
        }
        if inode.superblock().is_read_only() {
            return Err(VfsError::ReadOnly);
        }

        let _guard = self.lock_inode(inode);
        inode.mark_modified();
        let pos = if flags.contains(OpenFlags::APPEND) {
            inode.size()
        } else {
            file.position()
        };
        let limit = inode.superblock().ops().max_file_size();
        if pos
            .checked_add(buf.len() as u64)
            .is_none_or(|end| end > limit)
        {
            return Err(VfsError::Backend(libc::EFBIG));
        }
        let written = if flags.contains(OpenFlags::DIRECT) || !inode.kind().is_cacheable() {
            if let Some(pcache) = inode.page_cache() {
                pcache.commit_all(inode)?;
                pcache.release();
            }
            let n = file.ops().write(inode, buf, pos)?;
            inode.extend_size(pos + n as u64);
            n
        } else {
            inode
                .attach_page_cache(self.config.page_size)
                .write(inode, buf, pos)?
        };
        file.set_position(pos + written as u64);
        Ok(written)
    }

    /// Move the position of `fd`. Returns the new position.
    pub fn lseek(
        &self,
        proc: &Process,
        fd: Fd,
        offset: i64,
        whence: SeekWhence,
    ) -> VfsResult<u64> {
        let (file, _) = Self::file_of(proc, fd)?;
        let inode = file.inode();
        let _guard = self.lock_inode(inode);

        let base = match whence {
            SeekWhence::Set => 0,
            SeekWhence::Cur => file.position(),
            SeekWhence::End => inode.size(),
        };
        let pos = i64::try_from(base)
            .ok()
            .and_then(|base| base.checked_add(offset))
            .and_then(|pos| u64::try_from(pos).ok())
            .filter(|&pos| pos <= inode.superblock().ops().max_file_size())
            .ok_or(VfsError::InvalidArgument)?;
        file.ops().seek(inode, pos)?;
        file.set_position(pos);
        Ok(pos)
    }

    /// Read the directory entry at `dirent.offset` into `dirent` and advance the offset.
    ///
    /// Offsets 0 and 1 produce `.` and `..`. Returns `false` once the directory is exhausted.
    pub fn readdir(&self, proc: &Process, fd: Fd, dirent: &mut Dirent) -> VfsResult<bool> {
        let (file, _) = Self::file_of(proc, fd)?;
        let inode = file.inode();
        let _guard = self.lock_inode(inode);
        if !inode.kind().is_dir() {
            return Err(VfsError::NotADirectory);
        }

        let (name, kind) = match dirent.offset {
            0 => (super::hstr::DOT.to_owned(), Some(InodeKind::Directory)),
            1 => (super::hstr::DOTDOT.to_owned(), Some(InodeKind::Directory)),
            offset => {
                let mut produced = None;
                let more = {
                    let mut sink = |name: &str, kind: InodeKind| {
                        produced = Some((name.to_owned(), Some(kind)));
                    };
                    let mut ctx = DirContext::new(offset - 2, &mut sink);
                    file.ops().readdir(&file, &mut ctx)?
                };
                match produced {
                    Some(entry) if more => entry,
                    _ => return Ok(false),
                }
            }
        };
        dirent.name = name;
        dirent.kind = kind;
        dirent.offset += 1;
        Ok(true)
    }

    /// Create the directory `path`.
    #[instrument(name = "Vfs::mkdir", level = "debug", skip(self, proc))]
    pub fn mkdir(&self, proc: &Process, path: &str) -> VfsResult<()> {
        let (parent, name) = self.parent_of_new(proc.cwd(), path)?;
        self.create_child(&parent, name, |dir, d| {
            dir.ops().mkdir(dir, d)?;
            if d.kind().is_some_and(InodeKind::is_dir) {
                Ok(())
            } else {
                Err(VfsError::NotADirectory)
            }
        })
        .map(drop)
    }

    /// Remove the empty directory `path`.
    #[instrument(name = "Vfs::rmdir", level = "debug", skip(self, proc))]
    pub fn rmdir(&self, proc: &Process, path: &str) -> VfsResult<()> {
        let target = self.walk(proc.cwd(), path, WalkFlags::NOFOLLOW)?.dentry;
        self.rmdir_dentry(target)
    }

    /// Remove the non-directory `path`.
    #[instrument(name = "Vfs::unlink", level = "debug", skip(self, proc))]
    pub fn unlink(&self, proc: &Process, path: &str) -> VfsResult<()> {
        let target = self.walk(proc.cwd(), path, WalkFlags::NOFOLLOW)?.dentry;
        self.unlink_dentry(target)
    }

    /// [`Vfs::unlink`] relative to the directory open at `dirfd`.
    pub fn unlinkat(&self, proc: &Process, dirfd: Fd, path: &str) -> VfsResult<()> {
        let (dir, _) = Self::file_of(proc, dirfd)?;
        let target = self
            .walk(Some(dir.dentry()), path, WalkFlags::NOFOLLOW)?
            .dentry;
        self.unlink_dentry(target)
    }

    /// Make `new_path` another name for the file at `old_path`.
    #[instrument(name = "Vfs::link", level = "debug", skip(self, proc))]
    pub fn link(&self, proc: &Process, old_path: &str, new_path: &str) -> VfsResult<()> {
        let to_link = self.walk(proc.cwd(), old_path, WalkFlags::NOFOLLOW)?.dentry;
        let (parent, name) = self.parent_of_new(proc.cwd(), new_path)?;
        self.link_dentry(&to_link, &parent, name)
    }

    /// Create a symlink at `path` pointing at `target`.
    #[instrument(name = "Vfs::symlink", level = "debug", skip(self, proc))]
    pub fn symlink(&self, proc: &Process, path: &str, target: &str) -> VfsResult<()> {
        let (parent, name) = self.parent_of_new(proc.cwd(), path)?;
        let link = self.create_child(&parent, name, |dir, d| dir.ops().create(dir, d))?;
        let inode = link.inode().ok_or(VfsError::NotFound)?;
        let set = {
            let _guard = self.lock_inode(&inode);
            inode.ops().set_symlink(&inode, target)
        };
        if let Err(e) = set {
            if let Err(cleanup) = self.unlink_dentry(link) {
                warn!(error = %cleanup, "failed to remove half-made symlink");
            }
            return Err(e);
        }
        Ok(())
    }

    fn read_link(&self, link: &Arc<Dentry>) -> VfsResult<String> {
        let inode = link.inode().ok_or(VfsError::NotFound)?;
        if !inode.kind().is_symlink() {
            return Err(VfsError::InvalidArgument);
        }
        let _guard = self.lock_inode(&inode);
        inode.ops().read_symlink(&inode)
    }

    /// Target of the symlink at `path`.
    pub fn readlink(&self, proc: &Process, path: &str) -> VfsResult<String> {
        let link = self.walk(proc.cwd(), path, WalkFlags::NOFOLLOW)?.dentry;
        self.read_link(&link)
    }

    /// [`Vfs::readlink`] relative to the directory open at `dirfd`.
    pub fn readlinkat(&self, proc: &Process, dirfd: Fd, path: &str) -> VfsResult<String> {
        let (dir, _) = Self::file_of(proc, dirfd)?;
        let link = self
            .walk(Some(dir.dentry()), path, WalkFlags::NOFOLLOW)?
            .dentry;
        self.read_link(&link)
    }

    /// Move `old_path` to `new_path`, replacing a compatible entry already there.
    #[instrument(name = "Vfs::rename", level = "debug", skip(self, proc))]
    pub fn rename(&self, proc: &Process, old_path: &str, new_path: &str) -> VfsResult<()> {
        let cur = self.walk(proc.cwd(), old_path, WalkFlags::NOFOLLOW)?.dentry;
        let Walked { dentry: new_parent, trailing } =
            self.walk(proc.cwd(), new_path, WalkFlags::PARENT)?;
        let name = trailing.ok_or(VfsError::Busy)?;
        let target = match self.walk(Some(&*new_parent), name.as_str(), WalkFlags::NOFOLLOW) {
            Ok(found) => Some(found.dentry),
            Err(VfsError::NotFound) => None,
            Err(e) => return Err(e),
        };
        self.rename_dentry(cur, &new_parent, name, target)
    }

    fn bounded(path: String, size: usize) -> VfsResult<String> {
        if size < 2 || path.len() >= size {
            return Err(VfsError::Range);
        }
        Ok(path)
    }

    /// Absolute path of the file open at `fd`, failing [`VfsError::Range`] if it does not fit
    /// in a `size`-byte buffer.
    pub fn realpathat(&self, proc: &Process, fd: Fd, size: usize) -> VfsResult<String> {
        let (file, _) = Self::file_of(proc, fd)?;
        Self::bounded(self.path_of(file.dentry())?, size)
    }

    /// Commit dirty pages of `fd` and sync it.
    pub fn fsync(&self, proc: &Process, fd: Fd) -> VfsResult<()> {
        let (file, _) = Self::file_of(proc, fd)?;
        self.fsync_file(&file)
    }

    /// Duplicate `fd` into the lowest free descriptor.
    pub fn dup(&self, proc: &mut Process, fd: Fd) -> VfsResult<Fd> {
        let entry = proc.fds.get(fd)?.clone();
        let new_fd = proc.fds.lowest_free()?;
        entry.file.share();
        proc.fds.install(new_fd, entry)?;
        Ok(new_fd)
    }

    /// Duplicate `old_fd` onto `new_fd`, closing whatever `new_fd` held.
    pub fn dup2(&self, proc: &mut Process, old_fd: Fd, new_fd: Fd) -> VfsResult<Fd> {
        let entry = proc.fds.get(old_fd)?.clone();
        if old_fd == new_fd {
            return Ok(new_fd);
        }
        if new_fd.0 >= self.config.max_fds {
            return Err(VfsError::BadDescriptor);
        }
        if let Ok((previous, _)) = Self::file_of(proc, new_fd) {
            self.release(&previous)?;
        }
        entry.file.share();
        proc.fds.install(new_fd, entry)?;
        Ok(new_fd)
    }

    fn set_cwd(proc: &mut Process, dentry: &Arc<Dentry>) -> VfsResult<()> {
        if !dentry.kind().is_some_and(InodeKind::is_dir) {
            return Err(VfsError::NotADirectory);
        }
        if let Some(old) = proc.cwd.take() {
            old.put();
            mount::chillax(proc.cwd_mount.take().as_ref());
        }
        dentry.get();
        proc.cwd_mount = mount::mkbusy(dentry);
        proc.cwd = Some(Arc::clone(dentry));
        Ok(())
    }

    /// Change the working directory to `path`.
    pub fn chdir(&self, proc: &mut Process, path: &str) -> VfsResult<()> {
        let dir = self.walk(proc.cwd(), path, WalkFlags::empty())?.dentry;
        let _guard = self.dcache.lock(&dir);
        Self::set_cwd(proc, &dir)
    }

    /// Change the working directory to the directory open at `fd`.
    pub fn fchdir(&self, proc: &mut Process, fd: Fd) -> VfsResult<()> {
        let (file, _) = Self::file_of(proc, fd)?;
        let _guard = self.dcache.lock(file.dentry());
        Self::set_cwd(proc, file.dentry())
    }

    /// Absolute path of the working directory, failing [`VfsError::Range`] if it does not fit
    /// in a `size`-byte buffer.
    pub fn getcwd(&self, proc: &Process, size: usize) -> VfsResult<String> {
        let path = match proc.cwd() {
            Some(cwd) => self.path_of(cwd)?,
            None => "/".to_owned(),
        };
        Self::bounded(path, size)
    }

    /// Metadata of the file `path` names, following a final symlink.
    pub fn stat(&self, proc: &Process, path: &str) -> VfsResult<Metadata> {
        let dentry = self.walk(proc.cwd(), path, WalkFlags::empty())?.dentry;
        dentry
            .inode()
            .map(|i| i.metadata())
            .ok_or(VfsError::NotFound)
    }

    /// [`Vfs::stat`] without following a final symlink.
    pub fn lstat(&self, proc: &Process, path: &str) -> VfsResult<Metadata> {
        let dentry = self.walk(proc.cwd(), path, WalkFlags::NOFOLLOW)?.dentry;
        dentry
            .inode()
            .map(|i| i.metadata())
            .ok_or(VfsError::NotFound)
    }

    /// Metadata of the file open at `fd`.
    pub fn fstat(&self, proc: &Process, fd: Fd) -> VfsResult<Metadata> {
        let (file, _) = Self::file_of(proc, fd)?;
        Ok(file.inode().metadata())
    }

    /// Mount a new instance of `fs_name` on the directory `path`.
    #[instrument(name = "Vfs::mount", level = "debug", skip(self, proc))]
    pub fn mount(
        &self,
        proc: &Process,
        path: &str,
        fs_name: &str,
        flags: MountFlags,
    ) -> VfsResult<Arc<Mount>> {
        let target = self.walk(proc.cwd(), path, WalkFlags::empty())?.dentry;
        self.mount_at(&target, fs_name, flags)
    }

    /// Unmount the filesystem mounted on `path`.
    #[instrument(name = "Vfs::unmount", level = "debug", skip(self, proc))]
    pub fn unmount(&self, proc: &Process, path: &str) -> VfsResult<()> {
        let target = self.walk(proc.cwd(), path, WalkFlags::NOFOLLOW)?.dentry;
        self.unmount_at(&target)
    }

    /// Close every descriptor of `proc` and drop its working directory.
    pub fn exit_process(&self, proc: &mut Process) {
        for fd in proc.fds.open_fds() {
            if let Err(e) = self.close(proc, fd) {
                warn!(fd = fd.0, error = %e, "failed to close descriptor at exit");
            }
        }
        if let Some(cwd) = proc.cwd.take() {
            cwd.put();
            mount::chillax(proc.cwd_mount.take().as_ref());
        }
    }
}
