//! Filesystem traits and types.
//!
//! The kernel only ever reads its file store; programs, data files and the
//! clock device are all found through a flat directory.

pub mod bootfs;

pub use bootfs::BootFs;

use crate::config::NAME_CAPACITY;
use trine_common::SysError;

/// What a directory entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// The real-time clock device.
    Clock,
    /// The directory itself.
    Directory,
    /// A regular file.
    Regular,
}

impl FileKind {
    /// Decodes the on-disk kind field.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(FileKind::Clock),
            1 => Some(FileKind::Directory),
            2 => Some(FileKind::Regular),
            _ => None,
        }
    }
}

/// A resolved directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dentry {
    name: [u8; NAME_CAPACITY],
    /// Kind of object.
    pub kind: FileKind,
    /// Inode number; only meaningful for regular files.
    pub inode: u32,
}

impl Dentry {
    /// Creates an entry; `name` is truncated to the name capacity.
    pub fn new(name: &[u8], kind: FileKind, inode: u32) -> Self {
        let mut stored = [0; NAME_CAPACITY];
        let len = name.len().min(NAME_CAPACITY);
        stored[..len].copy_from_slice(&name[..len]);
        Dentry { name: stored, kind, inode }
    }

    /// The entry's name, without padding.
    pub fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_CAPACITY);
        &self.name[..len]
    }
}

/// Trait for a read-only file store.
pub trait FileStore: Sync {
    /// Looks up an entry by name. Only the first 32 bytes of `name` count.
    fn resolve(&self, name: &[u8]) -> Result<Dentry, SysError>;

    /// Returns the entry at `index` in directory order.
    fn entry(&self, index: usize) -> Result<Dentry, SysError>;

    /// Number of directory entries.
    fn entry_count(&self) -> usize;

    /// Reads from `inode` at `offset`; returns 0 at or past end of file.
    fn read(&self, inode: u32, offset: u32, buf: &mut [u8]) -> Result<usize, SysError>;
}
