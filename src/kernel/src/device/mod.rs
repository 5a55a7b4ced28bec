//! File descriptors and the backends behind them.
//!
//! Every descriptor names one [`Backend`]; reads, writes and closes are
//! dispatched on it. The environment a backend talks to (the calling task's
//! terminal, the file store, the clock) comes in through [`DeviceContext`].

pub mod clock;

use crate::config::{FIRST_FREE_FD, MAX_FILES, NAME_CAPACITY};
use crate::fs::FileStore;
use trine_common::SysError;

/// Direction of a terminal descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    /// Keyboard lines.
    Input,
    /// Screen output.
    Output,
}

/// What a descriptor is connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// The task's terminal.
    Terminal(Stream),
    /// The virtual real-time clock.
    Clock,
    /// A regular file in the store.
    File {
        /// Inode of the file.
        inode: u32,
    },
    /// The store's directory listing.
    Directory,
}

/// Services the backends need from the running kernel.
///
/// Every call acts on behalf of the current task.
pub trait DeviceContext {
    /// Blocks until the task's terminal has a line; returns bytes copied.
    fn read_line(&self, buf: &mut [u8]) -> usize;
    /// Renders bytes on the task's terminal.
    fn write_terminal(&self, bytes: &[u8]);
    /// The mounted file store.
    fn store(&self) -> Result<&dyn FileStore, SysError>;
    /// Opens the virtual clock for the task.
    fn open_clock(&self);
    /// Closes the virtual clock for the task.
    fn close_clock(&self);
    /// Blocks until the task's next clock tick.
    fn wait_for_tick(&self);
    /// Programs the periodic clock rate index.
    fn set_clock_rate(&self, rate: u8);
}

/// An open descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFile {
    /// Backend the descriptor dispatches to.
    pub backend: Backend,
    /// Byte offset for files, entry index for the directory.
    pub position: u32,
}

impl OpenFile {
    /// Opens `backend`.
    pub fn open(backend: Backend, ctx: &dyn DeviceContext) -> Result<Self, SysError> {
        if backend == Backend::Clock {
            ctx.open_clock();
        }
        Ok(OpenFile { backend, position: 0 })
    }

    /// Reads into `buf`, advancing the position where the backend has one.
    pub fn read(&mut self, ctx: &dyn DeviceContext, buf: &mut [u8]) -> Result<usize, SysError> {
        match self.backend {
            Backend::Terminal(Stream::Input) => Ok(ctx.read_line(buf)),
            Backend::Terminal(Stream::Output) => Err(SysError::Unsupported),
            Backend::Clock => {
                ctx.wait_for_tick();
                Ok(0)
            }
            Backend::File { inode } => {
                let read = ctx.store()?.read(inode, self.position, buf)?;
                self.position += read as u32;
                Ok(read)
            }
            Backend::Directory => {
                let store = ctx.store()?;
                let index = self.position as usize;
                if index >= store.entry_count() {
                    return Ok(0);
                }
                let entry = store.entry(index)?;
                let name = entry.name();
                let len = name.len().min(buf.len()).min(NAME_CAPACITY);
                buf[..len].copy_from_slice(&name[..len]);
                self.position += 1;
                Ok(len)
            }
        }
    }

    /// Writes `bytes`.
    pub fn write(&mut self, ctx: &dyn DeviceContext, bytes: &[u8]) -> Result<usize, SysError> {
        match self.backend {
            Backend::Terminal(Stream::Output) => {
                ctx.write_terminal(bytes);
                Ok(bytes.len())
            }
            Backend::Clock => {
                let raw: [u8; 4] = bytes
                    .get(..4)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(SysError::InvalidArgument)?;
                let rate = clock::rate_for(u32::from_le_bytes(raw))?;
                ctx.set_clock_rate(rate);
                Ok(0)
            }
            Backend::Terminal(Stream::Input) | Backend::File { .. } | Backend::Directory => {
                Err(SysError::Unsupported)
            }
        }
    }

    /// Releases backend state.
    pub fn close(self, ctx: &dyn DeviceContext) -> Result<(), SysError> {
        if self.backend == Backend::Clock {
            ctx.close_clock();
        }
        Ok(())
    }
}

/// A task's descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTable {
    files: [Option<OpenFile>; MAX_FILES],
}

impl FileTable {
    /// A table with nothing open.
    pub const fn new() -> Self {
        FileTable { files: [None; MAX_FILES] }
    }

    /// Binds 0 and 1 to the terminal and closes everything else.
    pub fn bind_terminal(&mut self) {
        self.files = [None; MAX_FILES];
        self.files[0] = Some(OpenFile {
            backend: Backend::Terminal(Stream::Input),
            position: 0,
        });
        self.files[1] = Some(OpenFile {
            backend: Backend::Terminal(Stream::Output),
            position: 0,
        });
    }

    /// Lowest free general-purpose descriptor.
    pub fn free_slot(&self) -> Result<usize, SysError> {
        (FIRST_FREE_FD..MAX_FILES)
            .find(|&fd| self.files[fd].is_none())
            .ok_or(SysError::ResourceExhausted)
    }

    /// Stores `file` at `fd`, which must come from [`FileTable::free_slot`].
    pub fn install(&mut self, fd: usize, file: OpenFile) {
        self.files[fd] = Some(file);
    }

    /// The descriptor at `fd`.
    pub fn get(&self, fd: usize) -> Result<OpenFile, SysError> {
        self.files
            .get(fd)
            .copied()
            .flatten()
            .ok_or(SysError::InvalidDescriptor)
    }

    /// Records a new position for `fd` if it is still open.
    pub fn set_position(&mut self, fd: usize, position: u32) {
        if let Some(Some(file)) = self.files.get_mut(fd) {
            file.position = position;
        }
    }

    /// Removes general-purpose descriptor `fd`.
    pub fn take(&mut self, fd: usize) -> Result<OpenFile, SysError> {
        if !(FIRST_FREE_FD..MAX_FILES).contains(&fd) {
            return Err(SysError::InvalidDescriptor);
        }
        self.files[fd].take().ok_or(SysError::InvalidDescriptor)
    }

    /// Puts a descriptor back after a failed close.
    pub fn restore(&mut self, fd: usize, file: OpenFile) {
        self.files[fd] = Some(file);
    }

    /// Removes every general-purpose descriptor, yielding the open ones.
    pub fn drain(&mut self) -> impl Iterator<Item = OpenFile> + '_ {
        self.files[FIRST_FREE_FD..].iter_mut().filter_map(Option::take)
    }

    #[cfg(test)]
    fn open_count(&self) -> usize {
        self.files.iter().flatten().count()
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}
