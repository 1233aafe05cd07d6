//! The memory-mapped on-disk image: superblock, inode table, directory and
//! file data blocks, and the typed accessors onto each.
//!
//! This is the only module that computes offsets into the mapped file.
//! Everything above it deals in inode numbers and dentry indices.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use memmap2::MmapMut;

/// Size of one block, in bytes.
pub const BLOCK_SIZE: u32 = 4096;
/// Magic number identifying a TOSFS image, from the original `tosfs.h`.
pub const MAGIC: u32 = 0x1b19b10c;
/// Mode value of a regular file (`S_IFREG | 0644`).
pub const REGULAR_FILE_MODE: u16 = 33188;
/// Maximum length of a directory entry's name, in bytes.
pub const MAX_NAME_LEN: usize = 32;
/// Block index of the superblock.
const SUPERBLOCK_BLOCK: u64 = 0;
/// Block index of the inode table.
const INODE_TABLE_BLOCK: u64 = 1;
/// Block index of the root directory table.
const DIR_TABLE_BLOCK: u64 = 2;
/// First block index of the file data region.
const DATA_REGION_BLOCK: u64 = 3;

/// The on-disk superblock, block 0 of the image.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct Superblock {
    pub magic: u32,
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub block_size: u32,
    pub blocks: u32,
    pub inodes: u32,
    pub root_inode: u32,
}

/// The on-disk inode record, 20 bytes, part of the inode table in block 1.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct Inode {
    pub inode: u32,
    pub block_no: u32,
    pub uid: u16,
    pub gid: u16,
    pub mode: u16,
    pub perm: u16,
    pub size: u16,
    pub nlink: u16,
}

/// The on-disk directory entry, 36 bytes, part of the root directory table
/// in block 2.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct Dentry {
    pub inode: u32,
    pub name: [u8; MAX_NAME_LEN],
}

impl Dentry {
    /// Returns the entry's name, trimmed at the first NUL byte (or the full
    /// 32 bytes if there is none).
    pub fn name_bytes(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        &self.name[..len]
    }
}

/// Writes `name` into a 32-byte, NUL-padded dentry name field.
///
/// `name` must be at most [`MAX_NAME_LEN`] bytes; callers are expected to
/// have already rejected longer names (`FsError::NameTooLong`).
pub fn pack_name(name: &[u8]) -> [u8; MAX_NAME_LEN] {
    debug_assert!(name.len() <= MAX_NAME_LEN);
    let mut buf = [0u8; MAX_NAME_LEN];
    buf[..name.len()].copy_from_slice(name);
    buf
}

/// The memory-mapped backing image.
///
/// Owns the mapping for as long as the filesystem is mounted; dropping it
/// unmaps the file. All accessors bounds-check against the superblock's
/// `inodes`/`blocks` fields rather than trusting the caller, since an
/// out-of-bounds index here would be a programming error in the Filesystem
/// Core, not a reachable runtime condition.
pub struct Volume {
    mmap: MmapMut,
}

impl Volume {
    /// Opens and memory-maps the backing image at `path`, validating the
    /// superblock.
    ///
    /// # Errors
    /// Returns an error if the file can't be opened or mapped, if it's too
    /// small to hold its declared number of blocks, or if the superblock's
    /// magic, block size or root inode don't match the TOSFS format.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let volume = Volume { mmap };

        if volume.mmap.len() < (SUPERBLOCK_BLOCK as usize + 1) * BLOCK_SIZE as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "image too small to hold a superblock",
            ));
        }
        let sb = *volume.superblock();
        if sb.magic != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad magic number: {:#x}", sb.magic),
            ));
        }
        if sb.block_size != BLOCK_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported block size: {}", sb.block_size),
            ));
        }
        if sb.root_inode != 1 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported root inode: {}", sb.root_inode),
            ));
        }
        if sb.inodes > sb.blocks || sb.blocks > 32 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("inconsistent capacity: inodes={} blocks={}", sb.inodes, sb.blocks),
            ));
        }
        let required = (DATA_REGION_BLOCK + sb.blocks as u64) * BLOCK_SIZE as u64;
        if (volume.mmap.len() as u64) < required {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "image too small: have {} bytes, need {required} for {} blocks",
                    volume.mmap.len(),
                    sb.blocks
                ),
            ));
        }
        Ok(volume)
    }

    fn ptr<T>(&self, offset: usize) -> *const T {
        assert!(offset + std::mem::size_of::<T>() <= self.mmap.len(), "offset out of bounds");
        unsafe { self.mmap.as_ptr().add(offset) as *const T }
    }

    fn ptr_mut<T>(&mut self, offset: usize) -> *mut T {
        assert!(offset + std::mem::size_of::<T>() <= self.mmap.len(), "offset out of bounds");
        unsafe { self.mmap.as_mut_ptr().add(offset) as *mut T }
    }

    /// A view of the superblock.
    pub fn superblock(&self) -> &Superblock {
        unsafe { &*self.ptr::<Superblock>((SUPERBLOCK_BLOCK * BLOCK_SIZE as u64) as usize) }
    }

    /// A mutable view of the superblock.
    pub fn superblock_mut(&mut self) -> &mut Superblock {
        unsafe { &mut *self.ptr_mut::<Superblock>((SUPERBLOCK_BLOCK * BLOCK_SIZE as u64) as usize) }
    }

    fn inode_offset(i: u32) -> usize {
        INODE_TABLE_BLOCK as usize * BLOCK_SIZE as usize + i as usize * std::mem::size_of::<Inode>()
    }

    /// A view of inode `i`. `i` must be in `[1, inodes]`.
    pub fn inode(&self, i: u32) -> &Inode {
        debug_assert!(i >= 1 && i <= self.superblock().inodes, "inode {i} out of range");
        unsafe { &*self.ptr::<Inode>(Self::inode_offset(i)) }
    }

    /// A mutable view of inode `i`. `i` must be in `[1, inodes]`.
    pub fn inode_mut(&mut self, i: u32) -> &mut Inode {
        debug_assert!(i >= 1, "inode {i} out of range");
        unsafe { &mut *self.ptr_mut::<Inode>(Self::inode_offset(i)) }
    }

    fn dentry_offset(k: u32) -> usize {
        DIR_TABLE_BLOCK as usize * BLOCK_SIZE as usize + k as usize * std::mem::size_of::<Dentry>()
    }

    /// A view of the k-th directory entry. `k` must be in `[0, inodes]`.
    pub fn dentry(&self, k: u32) -> &Dentry {
        debug_assert!(k <= self.superblock().inodes, "dentry {k} out of range");
        unsafe { &*self.ptr::<Dentry>(Self::dentry_offset(k)) }
    }

    /// A mutable view of the k-th directory entry. `k` must be in
    /// `[0, inodes]`.
    pub fn dentry_mut(&mut self, k: u32) -> &mut Dentry {
        debug_assert!(k >= 1, "dentry {k} out of range");
        unsafe { &mut *self.ptr_mut::<Dentry>(Self::dentry_offset(k)) }
    }

    fn data_offset(i: u32) -> usize {
        (i as u64 + 1).saturating_mul(BLOCK_SIZE as u64) as usize
    }

    /// The data block belonging to file inode `i`.
    pub fn data(&self, i: u32) -> &[u8] {
        let offset = Self::data_offset(i);
        &self.mmap[offset..offset + BLOCK_SIZE as usize]
    }

    /// The data block belonging to file inode `i`, mutable.
    pub fn data_mut(&mut self, i: u32) -> &mut [u8] {
        let offset = Self::data_offset(i);
        &mut self.mmap[offset..offset + BLOCK_SIZE as usize]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// Builds a minimal valid image with `blocks` capacity and writes dentry
    /// `root` name (usually empty: the root has no meaningful self-name in
    /// these fixtures). Returns the backing temp file so callers can extend
    /// it (e.g. seed extra files) before opening a `Volume` on it.
    pub(crate) fn build_image(blocks: u32, inodes: u32) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let total = (3 + blocks) as usize * BLOCK_SIZE as usize;
        let mut buf = vec![0u8; total];

        let sb = Superblock {
            magic: MAGIC,
            block_bitmap: 0,
            inode_bitmap: 0,
            block_size: BLOCK_SIZE,
            blocks,
            inodes,
            root_inode: 1,
        };
        unsafe {
            std::ptr::write(buf.as_mut_ptr() as *mut Superblock, sb);
        }

        // root directory inode (inode 1) + self dentry at index 1
        let root_inode = Inode {
            inode: 1,
            block_no: 1,
            uid: 0,
            gid: 0,
            mode: 0o040000 | 0o755,
            perm: 0o755,
            size: 0,
            nlink: 1,
        };
        let inode_off = BLOCK_SIZE as usize + 1 * std::mem::size_of::<Inode>();
        unsafe {
            std::ptr::write(buf.as_mut_ptr().add(inode_off) as *mut Inode, root_inode);
        }
        let root_dentry = Dentry { inode: 1, name: pack_name(b"") };
        let dentry_off = 2 * BLOCK_SIZE as usize + 1 * std::mem::size_of::<Dentry>();
        unsafe {
            std::ptr::write(buf.as_mut_ptr().add(dentry_off) as *mut Dentry, root_dentry);
        }

        file.write_all(&buf).unwrap();
        file.flush().unwrap();
        file
    }

    /// Adds a regular file at the next inode slot with the given name and
    /// contents (NUL-terminated by the caller if needed).
    pub(crate) fn seed_file(volume: &mut Volume, name: &[u8], contents: &[u8]) -> u32 {
        let k = volume.superblock().inodes;
        let new_ino = k + 1;
        volume.superblock_mut().inodes += 1;
        *volume.inode_mut(new_ino) = Inode {
            inode: new_ino,
            block_no: new_ino,
            uid: 0,
            gid: 0,
            mode: REGULAR_FILE_MODE,
            perm: 0o666,
            size: contents.len() as u16,
            nlink: 1,
        };
        *volume.dentry_mut(new_ino) = Dentry { inode: new_ino, name: pack_name(name) };
        volume.data_mut(new_ino)[..contents.len()].copy_from_slice(contents);
        new_ino
    }

    #[test]
    fn open_validates_magic() {
        let file = build_image(32, 1);
        let volume = Volume::open(file.path()).unwrap();
        assert_eq!(volume.superblock().magic, MAGIC);
    }

    #[test]
    fn open_rejects_bad_magic() {
        let mut file = build_image(32, 1);
        // Corrupt the magic number in place.
        use std::io::{Seek, SeekFrom};
        file.as_file_mut().seek(SeekFrom::Start(0)).unwrap();
        file.as_file_mut().write_all(&[0, 0, 0, 0]).unwrap();
        file.as_file_mut().flush().unwrap();
        assert!(Volume::open(file.path()).is_err());
    }

    #[test]
    fn data_offsets_are_inode_plus_one_blocks() {
        let file = build_image(32, 1);
        let mut volume = Volume::open(file.path()).unwrap();
        let ino = seed_file(&mut volume, b"one_file", b"hello\0");
        assert_eq!(ino, 2);
        assert_eq!(&volume.data(ino)[..6], b"hello\0");
    }
}
