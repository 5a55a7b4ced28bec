//! Boot-block file store.
//!
//! The image is a sequence of 4 KiB blocks:
//!
//! ```text
//! block 0           counts (entries, inodes, data blocks), 52 reserved bytes,
//!                   then up to 63 directory entries of 64 bytes each
//! blocks 1..=N      inodes: file length, then up to 1023 data block indices
//! blocks N+1..      data blocks
//! ```
//!
//! All integers are little-endian `u32`.

use super::{Dentry, FileKind, FileStore};
use crate::config::NAME_CAPACITY;
use trine_common::SysError;

/// Block size of the image.
pub const BLOCK_SIZE: usize = 4096;

/// Size of one directory entry in the boot block.
pub const DENTRY_SIZE: usize = 64;

/// Offset of the first directory entry in the boot block.
pub const DENTRY_TABLE_OFFSET: usize = 64;

/// Directory entries the boot block has room for.
pub const MAX_DENTRIES: usize = (BLOCK_SIZE - DENTRY_TABLE_OFFSET) / DENTRY_SIZE;

/// Data block indices an inode has room for.
pub const BLOCKS_PER_INODE: usize = BLOCK_SIZE / 4 - 1;

/// A file store backed by an in-memory boot-block image.
#[derive(Debug, Clone, Copy)]
pub struct BootFs<'a> {
    image: &'a [u8],
    entries: usize,
    inodes: usize,
    blocks: usize,
}

impl<'a> BootFs<'a> {
    /// Validates the header of `image` and wraps it.
    pub fn new(image: &'a [u8]) -> Result<Self, SysError> {
        if image.len() < BLOCK_SIZE {
            return Err(SysError::InvalidFormat);
        }
        let entries = word(image, 0) as usize;
        let inodes = word(image, 4) as usize;
        let blocks = word(image, 8) as usize;
        if entries > MAX_DENTRIES {
            return Err(SysError::InvalidFormat);
        }
        let needed = (1 + inodes + blocks)
            .checked_mul(BLOCK_SIZE)
            .ok_or(SysError::InvalidFormat)?;
        if image.len() < needed {
            return Err(SysError::InvalidFormat);
        }

        let fs = BootFs { image, entries, inodes, blocks };
        for index in 0..entries {
            fs.entry(index)?;
        }
        Ok(fs)
    }

    fn inode_offset(&self, inode: usize) -> usize {
        (1 + inode) * BLOCK_SIZE
    }

    fn data_offset(&self, block: usize) -> usize {
        (1 + self.inodes + block) * BLOCK_SIZE
    }

    /// Length in bytes of `inode`.
    pub fn file_len(&self, inode: u32) -> Result<u32, SysError> {
        let inode = inode as usize;
        if inode >= self.inodes {
            return Err(SysError::NotFound);
        }
        Ok(word(self.image, self.inode_offset(inode)))
    }
}

fn word(image: &[u8], offset: usize) -> u32 {
    let b = &image[offset..offset + 4];
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

impl FileStore for BootFs<'_> {
    fn resolve(&self, name: &[u8]) -> Result<Dentry, SysError> {
        let wanted = &name[..name.len().min(NAME_CAPACITY)];
        if wanted.is_empty() {
            return Err(SysError::NotFound);
        }
        (0..self.entries)
            .filter_map(|index| self.entry(index).ok())
            .find(|entry| entry.name() == wanted)
            .ok_or(SysError::NotFound)
    }

    fn entry(&self, index: usize) -> Result<Dentry, SysError> {
        if index >= self.entries {
            return Err(SysError::InvalidArgument);
        }
        let base = DENTRY_TABLE_OFFSET + index * DENTRY_SIZE;
        let kind = FileKind::from_raw(word(self.image, base + NAME_CAPACITY))
            .ok_or(SysError::InvalidFormat)?;
        let inode = word(self.image, base + NAME_CAPACITY + 4);
        Ok(Dentry::new(&self.image[base..base + NAME_CAPACITY], kind, inode))
    }

    fn entry_count(&self) -> usize {
        self.entries
    }

    fn read(&self, inode: u32, offset: u32, buf: &mut [u8]) -> Result<usize, SysError> {
        let len = self.file_len(inode)? as usize;
        let offset = offset as usize;
        if offset >= len {
            return Ok(0);
        }
        let total = buf.len().min(len - offset);
        let inode_base = self.inode_offset(inode as usize);

        let mut done = 0;
        while done < total {
            let position = offset + done;
            let slot = position / BLOCK_SIZE;
            if slot >= BLOCKS_PER_INODE {
                return Err(SysError::InvalidFormat);
            }
            let block = word(self.image, inode_base + 4 + slot * 4) as usize;
            if block >= self.blocks {
                return Err(SysError::InvalidFormat);
            }
            let within = position % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - within).min(total - done);
            let start = self.data_offset(block) + within;
            buf[done..done + chunk].copy_from_slice(&self.image[start..start + chunk]);
            done += chunk;
        }
        Ok(done)
    }
}
