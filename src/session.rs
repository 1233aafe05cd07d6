//! Session Adapter: the `fuser::Filesystem` implementation.
//!
//! Translates kernel requests (`&OsStr` names, `u64` inodes, `i64` offsets)
//! into `FilesystemCore` calls and marshals the results back into `fuser`
//! reply types. Contains no filesystem semantics of its own.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEntry, ReplyWrite, Request,
};
use log::{trace, warn};

use crate::fs::{Attributes, FilesystemCore};

/// Attribute cache TTL handed back to the kernel on every reply; the image
/// never changes out from under the kernel except through this process, so
/// any duration is safe, but a short one keeps `stat` output fresh in tests.
const TTL: Duration = Duration::from_secs(1);

fn mtime_for(atime: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(atime)
}

fn file_attr(attrs: Attributes) -> FileAttr {
    let kind = if attrs.is_dir() { FileType::Directory } else { FileType::RegularFile };
    let perm = attrs.mode & 0o7777;
    let time = mtime_for(attrs.atime);
    FileAttr {
        ino: attrs.ino,
        size: attrs.size,
        blocks: attrs.blocks,
        atime: time,
        mtime: time,
        ctime: time,
        crtime: time,
        kind,
        perm,
        nlink: attrs.nlink,
        uid: attrs.uid,
        gid: attrs.gid,
        rdev: 0,
        blksize: attrs.blksize,
        flags: 0,
    }
}

/// Wraps a [`FilesystemCore`] to implement the kernel-facing `fuser` trait.
pub struct Session {
    core: FilesystemCore,
}

impl Session {
    pub fn new(core: FilesystemCore) -> Self {
        Session { core }
    }
}

impl Filesystem for Session {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        trace!("lookup(parent={parent}, name={name:?})");
        match self.core.lookup(parent, name.as_bytes()) {
            Ok(attrs) => reply.entry(&TTL, &file_attr(attrs), 0),
            Err(e) => {
                warn!("lookup(parent={parent}, name={name:?}) -> {e}");
                reply.error(e.errno());
            }
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!("getattr(ino={ino})");
        match self.core.getattr(ino) {
            Ok(attrs) => reply.attr(&TTL, &file_attr(attrs)),
            Err(e) => {
                warn!("getattr(ino={ino}) -> {e}");
                reply.error(e.errno());
            }
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!("readdir(ino={ino}, offset={offset})");
        let entries = match self.core.readdir(ino) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("readdir(ino={ino}) -> {e}");
                reply.error(e.errno());
                return;
            }
        };
        for (i, entry) in entries.into_iter().enumerate().skip(offset.max(0) as usize) {
            let kind = if entry.is_dir { FileType::Directory } else { FileType::RegularFile };
            let name = OsStr::from_bytes(&entry.name);
            let full = reply.add(entry.synthetic_ino, (i + 1) as i64, kind, name);
            if full {
                break;
            }
        }
        reply.ok();
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!("read(ino={ino}, offset={offset}, size={size})");
        let offset = offset.max(0) as u64;
        match self.core.read(ino, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => {
                warn!("read(ino={ino}, offset={offset}) -> {e}");
                reply.error(e.errno());
            }
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!("write(ino={ino}, offset={offset}, len={})", data.len());
        let offset = offset.max(0) as u64;
        match self.core.write(ino, offset, data) {
            Ok(written) => reply.written(written),
            Err(e) => {
                warn!("write(ino={ino}, offset={offset}) -> {e}");
                reply.error(e.errno());
            }
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        trace!("create(parent={parent}, name={name:?}, mode={mode:#o})");
        match self.core.create(parent, name.as_bytes(), mode as u16) {
            Ok(attrs) => reply.created(&TTL, &file_attr(attrs), 0, 0, 0),
            Err(e) => {
                warn!("create(parent={parent}, name={name:?}) -> {e}");
                reply.error(e.errno());
            }
        }
    }
}
