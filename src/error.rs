//! Error types shared by the Volume and Filesystem Core layers.

use std::fmt;

/// A request-level failure, mapped to a POSIX errno by the session adapter.
///
/// Every Filesystem Core operation returns one of these instead of a raw
/// errno so that callers (including tests) can match on the failure kind
/// without depending on `libc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// No such file or directory: an unresolvable lookup, an out-of-range
    /// inode, or an operation against a parent other than the root.
    NotFound,
    /// The target of a directory-only operation isn't the root directory.
    NotADirectory,
    /// `create` was attempted with `inodes == blocks`.
    NoSpace,
    /// `create` was attempted with a name longer than 32 bytes.
    NameTooLong,
    /// `write` would place data at or past the end of the file's block.
    FileTooLarge,
}

impl FsError {
    /// The POSIX errno this failure is reported as.
    pub fn errno(self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::NoSpace => libc::ENOSPC,
            FsError::NameTooLong => libc::E2BIG,
            FsError::FileTooLarge => libc::EFBIG,
        }
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FsError::NotFound => "no such file or directory",
            FsError::NotADirectory => "not a directory",
            FsError::NoSpace => "no space left on device",
            FsError::NameTooLong => "name too long",
            FsError::FileTooLarge => "file too large",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for FsError {}

pub type FsResult<T> = Result<T, FsError>;
