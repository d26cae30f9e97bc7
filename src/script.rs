//! A line-oriented command interpreter driving one [`Process`].

use std::io::{self, Write};

use kvfs::fs::{Dirent, Process, Vfs, VfsError};
use kvfs::fs::{InodeKind, MountFlags, OpenFlags};
use kvfs::fs::ramfs::RamFs;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("{0}")]
    Vfs(#[from] VfsError),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub struct Shell<'a> {
    vfs: &'a Vfs,
    proc: Process,
}

impl<'a> Shell<'a> {
    pub fn new(vfs: &'a Vfs) -> Self {
        Self {
            proc: vfs.new_process(),
            vfs,
        }
    }

    /// Run one command line. Blank lines and `#` comments are ignored.
    pub fn exec(&mut self, line: &str, out: &mut impl Write) -> Result<(), ShellError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(());
        }
        debug!(line, "exec");
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            return Ok(());
        };
        let args: Vec<&str> = words.collect();

        match (cmd, args.as_slice()) {
            ("mkdir", [path]) => self.vfs.mkdir(&self.proc, path)?,
            ("rmdir", [path]) => self.vfs.rmdir(&self.proc, path)?,
            ("rm", [path]) => self.vfs.unlink(&self.proc, path)?,
            ("touch", [path]) => {
                let fd = self.vfs.open(&mut self.proc, path, OpenFlags::CREATE)?;
                self.vfs.close(&mut self.proc, fd)?;
            }
            ("write", [path, text @ ..]) => {
                let fd = self
                    .vfs
                    .open(&mut self.proc, path, OpenFlags::CREATE | OpenFlags::APPEND)?;
                let written = self.vfs.write(&self.proc, fd, text.join(" ").as_bytes());
                self.vfs.close(&mut self.proc, fd)?;
                written?;
            }
            ("cat", [path]) => {
                let fd = self.vfs.open(&mut self.proc, path, OpenFlags::empty())?;
                let mut buf = [0u8; 512];
                let result = loop {
                    match self.vfs.read(&self.proc, fd, &mut buf) {
                        Ok(0) => break Ok(()),
                        Ok(n) => out.write_all(&buf[..n])?,
                        Err(e) => break Err(e),
                    }
                };
                self.vfs.close(&mut self.proc, fd)?;
                result?;
                writeln!(out)?;
            }
            ("ls", [path]) => self.ls(path, out)?,
            ("ls", []) => self.ls(".", out)?,
            ("ln", ["-s", target, path]) => self.vfs.symlink(&self.proc, path, target)?,
            ("ln", [old, new]) => self.vfs.link(&self.proc, old, new)?,
            ("readlink", [path]) => writeln!(out, "{}", self.vfs.readlink(&self.proc, path)?)?,
            ("mv", [old, new]) => self.vfs.rename(&self.proc, old, new)?,
            ("cd", [path]) => self.vfs.chdir(&mut self.proc, path)?,
            ("pwd", []) => {
                let cwd = self.vfs.getcwd(&self.proc, self.vfs.config().path_max + 1)?;
                writeln!(out, "{cwd}")?;
            }
            ("stat", [path]) => {
                let meta = self.vfs.lstat(&self.proc, path)?;
                writeln!(
                    out,
                    "id={} kind={:?} size={} links={} opens={}",
                    meta.id, meta.kind, meta.size, meta.link_count, meta.open_count
                )?;
            }
            ("mount", [path]) => {
                self.vfs
                    .mount(&self.proc, path, RamFs::NAME, MountFlags::empty())?;
            }
            ("mount", ["-r", path]) => {
                self.vfs
                    .mount(&self.proc, path, RamFs::NAME, MountFlags::READ_ONLY)?;
            }
            ("umount", [path]) => self.vfs.unmount(&self.proc, path)?,
            (
                "mkdir" | "rmdir" | "rm" | "touch" | "write" | "cat" | "ls" | "ln" | "readlink"
                | "mv" | "cd" | "pwd" | "stat" | "mount" | "umount",
                _,
            ) => return Err(ShellError::Usage(usage(cmd))),
            _ => return Err(ShellError::Unknown(cmd.to_owned())),
        }
        Ok(())
    }

    fn ls(&mut self, path: &str, out: &mut impl Write) -> Result<(), ShellError> {
        let fd = self.vfs.open(&mut self.proc, path, OpenFlags::empty())?;
        let mut dirent = Dirent::default();
        let result = loop {
            match self.vfs.readdir(&self.proc, fd, &mut dirent) {
                Ok(true) => {
                    let marker = match dirent.kind {
                        Some(InodeKind::Directory) => "/",
                        Some(InodeKind::Symlink) => "@",
                        _ => "",
                    };
                    writeln!(out, "{}{marker}", dirent.name)?;
                }
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.vfs.close(&mut self.proc, fd)?;
        Ok(result?)
    }

    /// Release the shell's descriptors and working directory.
    pub fn finish(mut self) {
        self.vfs.exit_process(&mut self.proc);
    }
}

fn usage(cmd: &str) -> &'static str {
    match cmd {
        "write" => "write PATH TEXT...",
        "ls" => "ls [PATH]",
        "ln" => "ln [-s] TARGET PATH",
        "mv" => "mv OLD NEW",
        "pwd" => "pwd",
        "mount" => "mount [-r] PATH",
        "umount" => "umount PATH",
        "mkdir" => "mkdir PATH",
        "rmdir" => "rmdir PATH",
        "rm" => "rm PATH",
        "touch" => "touch PATH",
        "cat" => "cat PATH",
        "readlink" => "readlink PATH",
        "cd" => "cd PATH",
        _ => "stat PATH",
    }
}
