#![allow(dead_code, missing_docs, clippy::unwrap_used)]

use std::sync::Arc;

use kvfs::config::{CacheConfig, VfsConfig};
use kvfs::fs::ramfs::{RamFs, RamFsStats};
use kvfs::fs::{Fd, MountFlags, OpenFlags, Process, Vfs};

/// A VFS with a ramfs mounted on the global root, plus the backend call counters.
pub struct Booted {
    pub vfs: Vfs,
    pub stats: Arc<RamFsStats>,
}

impl Booted {
    pub fn process(&self) -> Process {
        self.vfs.new_process()
    }
}

pub fn boot() -> Booted {
    boot_with(VfsConfig::default())
}

pub fn boot_with(config: VfsConfig) -> Booted {
    let vfs = Vfs::new(config).unwrap();
    let ramfs = RamFs::new();
    let stats = Arc::clone(ramfs.stats());
    vfs.register_filesystem(Arc::new(ramfs)).unwrap();
    vfs.mount_root(RamFs::NAME, MountFlags::empty()).unwrap();
    Booted { vfs, stats }
}

/// Default configuration with both object caches capped at `capacity`.
pub fn small_caches(capacity: usize) -> VfsConfig {
    VfsConfig {
        dcache: CacheConfig { capacity },
        icache: CacheConfig { capacity },
        ..VfsConfig::default()
    }
}

/// Create `path` with `contents` and close it again.
pub fn write_file(vfs: &Vfs, proc: &mut Process, path: &str, contents: &[u8]) {
    let fd = vfs.open(proc, path, OpenFlags::CREATE).unwrap();
    assert_eq!(vfs.write(proc, fd, contents).unwrap(), contents.len());
    vfs.close(proc, fd).unwrap();
}

/// Read everything from `fd` starting at its current position.
pub fn read_to_end(vfs: &Vfs, proc: &Process, fd: Fd) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 37];
    loop {
        let n = vfs.read(proc, fd, &mut buf).unwrap();
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n]);
    }
}

pub fn read_file(vfs: &Vfs, proc: &mut Process, path: &str) -> Vec<u8> {
    let fd = vfs.open(proc, path, OpenFlags::empty()).unwrap();
    let out = read_to_end(vfs, proc, fd);
    vfs.close(proc, fd).unwrap();
    out
}

/// Every name `readdir` produces for the directory at `path`, in order.
pub fn list(vfs: &Vfs, proc: &mut Process, path: &str) -> Vec<String> {
    let fd = vfs.open(proc, path, OpenFlags::empty()).unwrap();
    let mut dirent = kvfs::fs::Dirent::default();
    let mut names = Vec::new();
    while vfs.readdir(proc, fd, &mut dirent).unwrap() {
        names.push(dirent.name.clone());
    }
    vfs.close(proc, fd).unwrap();
    names
}
