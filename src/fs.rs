//! Filesystem Core: the six semantic operations (`lookup`, `getattr`,
//! `readdir`, `read`, `create`, `write`), independent of any kernel-protocol
//! types so they can be exercised directly in tests.

use crate::error::{FsError, FsResult};
use crate::volume::{self, Dentry, Volume, BLOCK_SIZE, REGULAR_FILE_MODE};

/// A fixed point in time the format reports for every inode's access time,
/// since the on-disk format has no concept of timestamps. 2042-01-01 UTC.
pub const FIXED_ATIME: u64 = 2272147200;

/// The inode number of, and only, directory this filesystem has.
pub const ROOT_INODE: u64 = 1;

/// Materialized attributes for one inode, independent of any reply type the
/// session adapter might marshal them into.
#[derive(Debug, Clone, Copy)]
pub struct Attributes {
    pub ino: u64,
    pub mode: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blksize: u32,
    pub blocks: u64,
    pub atime: u64,
}

impl Attributes {
    /// Whether this inode is the root directory (mode's file-type bits
    /// indicate a directory rather than the fixed regular-file mode).
    pub fn is_dir(&self) -> bool {
        self.mode != REGULAR_FILE_MODE
    }
}

/// One entry as returned by `readdir`: a name and a synthetic, dtype-hinting
/// inode number (see `FilesystemCore::readdir`).
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: Vec<u8>,
    pub synthetic_ino: u64,
    pub is_dir: bool,
}

/// Implements the six filesystem operations against a `Volume`.
///
/// Holds the Volume for the entire mount's lifetime; there is no additional
/// state (no open-file table, no cache) because the mapping itself is both.
pub struct FilesystemCore {
    volume: Volume,
}

impl FilesystemCore {
    /// Wraps an already-opened, validated `Volume`.
    pub fn new(volume: Volume) -> Self {
        FilesystemCore { volume }
    }

    fn attributes_for(&self, ino: u32) -> Attributes {
        let inode = *self.volume.inode(ino);
        let sb = *self.volume.superblock();
        Attributes {
            ino: ino as u64,
            mode: inode.mode,
            nlink: inode.nlink as u32,
            uid: inode.uid as u32,
            gid: inode.gid as u32,
            size: inode.size as u64,
            blksize: BLOCK_SIZE,
            blocks: sb.blocks as u64,
            atime: FIXED_ATIME,
        }
    }

    /// Resolves `name` within `parent`, the only directory this filesystem
    /// has. Returns `FsError::NotFound` if `parent` isn't the root, or if
    /// zero or more than one entry matches `name`.
    pub fn lookup(&self, parent: u64, name: &[u8]) -> FsResult<Attributes> {
        if parent != ROOT_INODE {
            return Err(FsError::NotFound);
        }
        let inodes = self.volume.superblock().inodes;
        let mut found: Option<u32> = None;
        let mut matches = 0u32;
        for k in 0..=inodes {
            let dentry: Dentry = *self.volume.dentry(k);
            if dentry.name_bytes() == name {
                matches += 1;
                found = Some(dentry.inode);
            }
        }
        if matches != 1 {
            return Err(FsError::NotFound);
        }
        Ok(self.attributes_for(found.unwrap()))
    }

    /// Returns the attributes of inode `ino`, or `FsError::NotFound` if it's
    /// out of range.
    pub fn getattr(&self, ino: u64) -> FsResult<Attributes> {
        let inodes = self.volume.superblock().inodes as u64;
        if ino < 1 || ino > inodes {
            return Err(FsError::NotFound);
        }
        Ok(self.attributes_for(ino as u32))
    }

    /// Enumerates the root directory's entries, the k-th of which
    /// corresponds to dentry slot `k` (including the always-empty slot 0 —
    /// see SPEC_FULL.md §9). `ino` must be the root, else
    /// `FsError::NotADirectory`.
    pub fn readdir(&self, ino: u64) -> FsResult<Vec<DirEntry>> {
        if ino != ROOT_INODE {
            return Err(FsError::NotADirectory);
        }
        let inodes = self.volume.superblock().inodes;
        let mut entries = Vec::with_capacity(inodes as usize + 1);
        for k in 0..=inodes {
            let dentry: Dentry = *self.volume.dentry(k);
            let is_dir = if k == 0 {
                // The padding slot never holds a live inode; treat it as a
                // directory entry, matching the original's unconditional
                // `(mode == 33188) + 1` read of whatever garbage sits there
                // being zero (not 33188), so it classifies as a directory.
                true
            } else {
                self.volume.inode(k).mode != REGULAR_FILE_MODE
            };
            entries.push(DirEntry {
                name: dentry.name_bytes().to_vec(),
                synthetic_ino: if is_dir { 1 } else { 2 },
                is_dir,
            });
        }
        Ok(entries)
    }

    /// Reads up to `size` bytes from file inode `ino` starting at `off`.
    /// The readable length is the position of the first NUL byte in the
    /// file's data block, not the inode's stored `size` field (see
    /// SPEC_FULL.md §9).
    pub fn read(&self, ino: u64, off: u64, size: u32) -> FsResult<Vec<u8>> {
        let inodes = self.volume.superblock().inodes as u64;
        if ino < 1 || ino > inodes {
            return Err(FsError::NotFound);
        }
        let ino32 = ino as u32;
        debug_assert_eq!(self.volume.inode(ino32).mode, REGULAR_FILE_MODE);
        let data = self.volume.data(ino32);
        let len = data.iter().position(|&b| b == 0).unwrap_or(data.len()) as u64;
        if off >= len {
            return Ok(Vec::new());
        }
        let end = len.min(off + size as u64);
        Ok(data[off as usize..end as usize].to_vec())
    }

    /// Creates a new regular file named `name` in the root directory with
    /// the given `mode`, returning its attributes.
    pub fn create(&mut self, parent: u64, name: &[u8], mode: u16) -> FsResult<Attributes> {
        if parent != ROOT_INODE {
            return Err(FsError::NotFound);
        }
        let sb = *self.volume.superblock();
        if sb.inodes == sb.blocks {
            return Err(FsError::NoSpace);
        }
        if name.len() > volume::MAX_NAME_LEN {
            return Err(FsError::NameTooLong);
        }

        let k = sb.inodes;
        let new_ino = k + 1;

        let sb_mut = self.volume.superblock_mut();
        sb_mut.block_bitmap = (sb_mut.block_bitmap << 1) | 1;
        sb_mut.inode_bitmap = (sb_mut.inode_bitmap << 1) | 2;
        sb_mut.inodes = new_ino;

        *self.volume.inode_mut(new_ino) = crate::volume::Inode {
            inode: new_ino,
            block_no: new_ino,
            uid: 0,
            gid: 0,
            mode,
            perm: 0o666,
            size: 0,
            nlink: 1,
        };
        *self.volume.dentry_mut(new_ino) = Dentry {
            inode: new_ino,
            name: volume::pack_name(name),
        };

        Ok(self.attributes_for(new_ino))
    }

    /// Writes `buf` into file inode `ino` at byte offset `off`, returning
    /// the number of bytes written. Fails with `FsError::FileTooLarge` if
    /// `off + buf.len() >= BLOCK_SIZE`.
    pub fn write(&mut self, ino: u64, off: u64, buf: &[u8]) -> FsResult<u32> {
        if off + buf.len() as u64 >= BLOCK_SIZE as u64 {
            return Err(FsError::FileTooLarge);
        }
        let ino32 = ino as u32;
        let data = self.volume.data_mut(ino32);
        data[off as usize..off as usize + buf.len()].copy_from_slice(buf);
        self.volume.inode_mut(ino32).size = (off + buf.len() as u64) as u16;
        Ok(buf.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::tests::{build_image, seed_file};

    fn core_with_seed() -> FilesystemCore {
        let file = build_image(32, 1);
        let mut volume = Volume::open(file.path()).unwrap();
        seed_file(&mut volume, b"one_file", b"hello\0");
        // Leak the tempfile for the test's duration by boxing it; dropping
        // it would delete the backing file out from under the mapping.
        std::mem::forget(file);
        FilesystemCore::new(volume)
    }

    #[test]
    fn read_seed_file() {
        let core = core_with_seed();
        let attrs = core.lookup(1, b"one_file").unwrap();
        assert_eq!(attrs.ino, 2);
        let data = core.read(2, 0, 1024).unwrap();
        assert_eq!(data, b"hello");
    }

    #[test]
    fn lookup_rejects_non_root_parent() {
        let core = core_with_seed();
        assert_eq!(core.lookup(2, b"one_file").unwrap_err(), FsError::NotFound);
    }

    #[test]
    fn lookup_ambiguous_name_is_not_found() {
        let file = build_image(32, 1);
        let mut volume = Volume::open(file.path()).unwrap();
        seed_file(&mut volume, b"dup", b"a\0");
        seed_file(&mut volume, b"dup", b"b\0");
        std::mem::forget(file);
        let core = FilesystemCore::new(volume);
        assert_eq!(core.lookup(1, b"dup").unwrap_err(), FsError::NotFound);
    }

    #[test]
    fn readdir_non_root_is_not_a_directory() {
        let core = core_with_seed();
        assert_eq!(core.readdir(2).unwrap_err(), FsError::NotADirectory);
    }

    #[test]
    fn readdir_lists_created_file() {
        let core = core_with_seed();
        let entries = core.readdir(1).unwrap();
        assert!(entries.iter().any(|e| e.name == b"one_file"));
    }

    #[test]
    fn create_within_capacity() {
        let mut core = core_with_seed();
        let attrs = core.create(1, b"new", REGULAR_FILE_MODE).unwrap();
        assert_eq!(attrs.ino, 3);
        let entries = core.readdir(1).unwrap();
        assert!(entries.iter().any(|e| e.name == b"new"));
    }

    #[test]
    fn create_monotonicity_and_bitmap_discipline() {
        let mut core = core_with_seed();
        let before = *core.volume.superblock();
        for n in 0..3u32 {
            let attrs = core.create(1, format!("f{n}").as_bytes(), REGULAR_FILE_MODE).unwrap();
            let sb = *core.volume.superblock();
            assert_eq!(sb.inodes, before.inodes + n + 1);
            assert_eq!(attrs.ino, (before.inodes + n + 1) as u64);
            assert_eq!(sb.block_bitmap & 1, 1);
            assert_eq!(sb.inode_bitmap & 2, 2);
        }
    }

    #[test]
    fn create_out_of_space() {
        let file = build_image(1, 1);
        let mut volume = Volume::open(file.path()).unwrap();
        std::mem::forget(file);
        let mut core = FilesystemCore::new(volume);
        // blocks == inodes == 1: no room left.
        assert_eq!(
            core.create(1, b"x", REGULAR_FILE_MODE).unwrap_err(),
            FsError::NoSpace
        );
    }

    #[test]
    fn create_name_too_long() {
        let mut core = core_with_seed();
        let name = vec![b'a'; 33];
        assert_eq!(core.create(1, &name, REGULAR_FILE_MODE).unwrap_err(), FsError::NameTooLong);
    }

    #[test]
    fn write_read_round_trip() {
        let mut core = core_with_seed();
        let attrs = core.create(1, b"rw", REGULAR_FILE_MODE).unwrap();
        let written = core.write(attrs.ino, 0, b"abcdef\0").unwrap();
        assert_eq!(written, 7);
        let data = core.read(attrs.ino, 0, 1024).unwrap();
        assert_eq!(data, b"abcdef");
    }

    #[test]
    fn write_oversize_is_rejected() {
        let mut core = core_with_seed();
        let attrs = core.create(1, b"big", REGULAR_FILE_MODE).unwrap();
        let buf = vec![b'x'; 5000];
        assert_eq!(core.write(attrs.ino, 0, &buf).unwrap_err(), FsError::FileTooLarge);
        // inode size is unchanged by a rejected write
        assert_eq!(core.getattr(attrs.ino).unwrap().size, 0);
    }
}
