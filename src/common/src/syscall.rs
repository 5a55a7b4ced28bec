//! System call ordinals.

/// Interrupt vector used for the system call gate.
pub const SYSCALL_VECTOR: u8 = 0x80;

/// Status reported to a parent when its child was killed by a CPU exception.
pub const FAULT_STATUS: i32 = 256;

/// System call numbers, passed in `rax`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u64)]
pub enum Syscall {
    /// `halt(status: u8) -> !`
    Halt = 1,
    /// `execute(command: *const u8) -> i32`
    Execute = 2,
    /// `read(fd, buf, n) -> i32`
    Read = 3,
    /// `write(fd, buf, n) -> i32`
    Write = 4,
    /// `open(name: *const u8) -> i32`
    Open = 5,
    /// `close(fd) -> i32`
    Close = 6,
    /// `getargs(buf, n) -> i32`
    GetArgs = 7,
    /// `vidmap(screen_start: *mut *mut u8) -> i32`
    Vidmap = 8,
}

impl TryFrom<u64> for Syscall {
    type Error = u64;

    fn try_from(number: u64) -> Result<Self, Self::Error> {
        Ok(match number {
            1 => Syscall::Halt,
            2 => Syscall::Execute,
            3 => Syscall::Read,
            4 => Syscall::Write,
            5 => Syscall::Open,
            6 => Syscall::Close,
            7 => Syscall::GetArgs,
            8 => Syscall::Vidmap,
            other => return Err(other),
        })
    }
}
