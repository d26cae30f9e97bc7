//! Error type shared by every VFS operation.

use thiserror::Error;

/// Result alias used throughout the VFS.
pub type VfsResult<T> = Result<T, VfsError>;

/// Every way a VFS operation can fail.
///
/// Each variant maps onto one `errno` value through [`VfsError::errno`], so the syscall surface
/// can hand a plain integer back to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VfsError {
    /// A path component does not exist.
    #[error("no such file or directory")]
    NotFound,
    /// The name to be created already exists.
    #[error("file exists")]
    AlreadyExists,
    /// A non-directory was used where a directory was required.
    #[error("not a directory")]
    NotADirectory,
    /// A directory was used where a non-directory was required.
    #[error("is a directory")]
    IsADirectory,
    /// The directory still has entries.
    #[error("directory not empty")]
    NotEmpty,
    /// The target is referenced by someone else.
    #[error("device or resource busy")]
    Busy,
    /// The operation would cross superblocks.
    #[error("invalid cross-device link")]
    CrossDevice,
    /// The superblock is mounted read-only.
    #[error("read-only file system")]
    ReadOnly,
    /// The backend does not implement the requested operation.
    #[error("operation not supported")]
    Unsupported,
    /// A path component or the whole path is too long.
    #[error("file name too long")]
    NameTooLong,
    /// Malformed argument, such as an invalid character in a path component.
    #[error("invalid argument")]
    InvalidArgument,
    /// The descriptor table is full.
    #[error("too many open files")]
    TooManyOpenFiles,
    /// Symlink resolution exceeded the configured depth.
    #[error("too many levels of symbolic links")]
    SymlinkLoop,
    /// A caller-provided buffer is too small.
    #[error("result too large")]
    Range,
    /// The descriptor is not open.
    #[error("bad file descriptor")]
    BadDescriptor,
    /// A cache pool stayed exhausted after an eviction pass.
    #[error("out of memory")]
    OutOfMemory,
    /// The walk reached a dentry with no filesystem mounted on it.
    #[error("no such device")]
    NoDevice,
    /// Opaque backend error code, passed through unchanged.
    #[error("backend error {0}")]
    Backend(i32),
}

impl VfsError {
    /// The `errno` value for this error.
    #[must_use]
    pub fn errno(self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::AlreadyExists => libc::EEXIST,
            Self::NotADirectory => libc::ENOTDIR,
            Self::IsADirectory => libc::EISDIR,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::Busy => libc::EBUSY,
            Self::CrossDevice => libc::EXDEV,
            Self::ReadOnly => libc::EROFS,
            Self::Unsupported => libc::ENOTSUP,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::InvalidArgument => libc::EINVAL,
            Self::TooManyOpenFiles => libc::EMFILE,
            Self::SymlinkLoop => libc::ELOOP,
            Self::Range => libc::ERANGE,
            Self::BadDescriptor => libc::EBADF,
            Self::OutOfMemory => libc::ENOMEM,
            Self::NoDevice => libc::ENODEV,
            Self::Backend(code) => code,
        }
    }

    /// Maps an `errno` value back onto an error. Unknown codes become [`VfsError::Backend`].
    #[must_use]
    pub fn from_errno(code: i32) -> Self {
        match code {
            libc::ENOENT => Self::NotFound,
            libc::EEXIST => Self::AlreadyExists,
            libc::ENOTDIR => Self::NotADirectory,
            libc::EISDIR => Self::IsADirectory,
            libc::ENOTEMPTY => Self::NotEmpty,
            libc::EBUSY => Self::Busy,
            libc::EXDEV => Self::CrossDevice,
            libc::EROFS => Self::ReadOnly,
            libc::ENOTSUP => Self::Unsupported,
            libc::ENAMETOOLONG => Self::NameTooLong,
            libc::EINVAL => Self::InvalidArgument,
            libc::EMFILE => Self::TooManyOpenFiles,
            libc::ELOOP => Self::SymlinkLoop,
            libc::ERANGE => Self::Range,
            libc::EBADF => Self::BadDescriptor,
            libc::ENOMEM => Self::OutOfMemory,
            libc::ENODEV => Self::NoDevice,
            other => Self::Backend(other),
        }
    }
}

impl From<VfsError> for i32 {
    fn from(e: VfsError) -> Self {
        e.errno()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_round_trips_for_named_variants() {
        for e in [
            VfsError::NotFound,
            VfsError::Busy,
            VfsError::CrossDevice,
            VfsError::SymlinkLoop,
            VfsError::Range,
            VfsError::TooManyOpenFiles,
            VfsError::NoDevice,
        ] {
            assert_eq!(VfsError::from_errno(e.errno()), e);
        }
    }

    #[test]
    fn unknown_errno_is_passed_through() {
        let e = VfsError::from_errno(libc::EPERM);
        assert_eq!(e, VfsError::Backend(libc::EPERM));
        assert_eq!(i32::from(e), libc::EPERM);
    }
}
