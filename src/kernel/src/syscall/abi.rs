//! The `int 0x80` calling convention.
//!
//! User programs pass an ordinal and up to three integer arguments. Pointer
//! arguments must lie entirely inside the caller's program image. Results
//! are non-negative on success and a negative [`SysError`] code otherwise.

use super::Kernel;
use crate::config::{LARGE_PAGE_SIZE, PROGRAM_IMAGE_VIRT, USER_STRING_LIMIT};
use core::slice;
use trine_common::{SysError, Syscall};
use trine_hal::Platform;

const IMAGE_END: u64 = PROGRAM_IMAGE_VIRT + LARGE_PAGE_SIZE;

impl<P: Platform> Kernel<P> {
    /// Dispatches system call `number`.
    pub fn syscall(&self, number: u64, a: u64, b: u64, c: u64) -> i64 {
        let result = match Syscall::try_from(number) {
            Ok(Syscall::Halt) => self.halt(a as u8),
            Ok(Syscall::Execute) => self
                .user_str(a)
                .and_then(|command| self.execute(command))
                .map(i64::from),
            Ok(Syscall::Read) => self
                .user_slice(b, c)
                .and_then(|buf| self.read(a as usize, buf))
                .map(|n| n as i64),
            Ok(Syscall::Write) => self
                .user_slice(b, c)
                .and_then(|bytes| self.write(a as usize, bytes))
                .map(|n| n as i64),
            Ok(Syscall::Open) => self
                .user_str(a)
                .and_then(|name| self.open(name))
                .map(|fd| fd as i64),
            Ok(Syscall::Close) => self.close(a as usize).map(|()| 0),
            Ok(Syscall::GetArgs) => self
                .user_slice(a, b)
                .and_then(|buf| self.getargs(buf))
                .map(|()| 0),
            Ok(Syscall::Vidmap) => self.vidmap(a).and_then(|address| {
                self.user_slice(a, 8)?
                    .copy_from_slice(&address.to_le_bytes());
                Ok(0)
            }),
            Err(_) => Err(SysError::InvalidArgument),
        };
        result.unwrap_or_else(|err| i64::from(err.code()))
    }

    /// The user bytes `[ptr, ptr + len)` of the current program image.
    fn user_slice(&self, ptr: u64, len: u64) -> Result<&mut [u8], SysError> {
        let end = ptr.checked_add(len).ok_or(SysError::InvalidArgument)?;
        if ptr < PROGRAM_IMAGE_VIRT || end > IMAGE_END {
            return Err(SysError::InvalidArgument);
        }
        // SAFETY: the range lies inside the current task's mapped image.
        Ok(unsafe { slice::from_raw_parts_mut(self.platform.user(ptr), len as usize) })
    }

    /// The NUL-terminated user string at `ptr`, without its terminator.
    fn user_str(&self, ptr: u64) -> Result<&[u8], SysError> {
        if !(PROGRAM_IMAGE_VIRT..IMAGE_END).contains(&ptr) {
            return Err(SysError::InvalidArgument);
        }
        let limit = (IMAGE_END - ptr).min(USER_STRING_LIMIT as u64);
        let bytes = self.user_slice(ptr, limit)?;
        let len = bytes
            .iter()
            .position(|&b| b == 0)
            .ok_or(SysError::InvalidArgument)?;
        Ok(&bytes[..len])
    }
}
