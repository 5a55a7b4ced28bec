//! User-side system call wrappers for Trine programs.
//!
//! Each call traps through the `int 0x80` gate with the ordinal in `rax`
//! and arguments in `rdi`, `rsi` and `rdx`. Negative results are decoded
//! into [`SysError`].

#![cfg_attr(not(test), no_std)]

use core::ffi::CStr;
pub use trine_common::{SysError, Syscall};

/// Descriptor of the terminal keyboard.
pub const STDIN: usize = 0;
/// Descriptor of the terminal screen.
pub const STDOUT: usize = 1;

/// Ends the calling program with `status`.
pub fn halt(status: u8) -> ! {
    // SAFETY: halt never returns to the caller.
    unsafe { raw(Syscall::Halt, u64::from(status), 0, 0) };
    #[allow(clippy::empty_loop)]
    loop {}
}

/// Runs `command` (program name, then arguments) and returns its status.
pub fn execute(command: &CStr) -> Result<i32, SysError> {
    // SAFETY: the kernel only reads the NUL-terminated string.
    let ret = unsafe { raw(Syscall::Execute, command.as_ptr() as u64, 0, 0) };
    decode(ret).map(|status| status as i32)
}

/// Reads into `buf` from descriptor `fd`.
pub fn read(fd: usize, buf: &mut [u8]) -> Result<usize, SysError> {
    // SAFETY: the kernel writes at most `buf.len()` bytes.
    let ret = unsafe { raw(Syscall::Read, fd as u64, buf.as_mut_ptr() as u64, buf.len() as u64) };
    decode(ret).map(|n| n as usize)
}

/// Writes `bytes` to descriptor `fd`.
pub fn write(fd: usize, bytes: &[u8]) -> Result<usize, SysError> {
    // SAFETY: the kernel only reads `bytes`.
    let ret = unsafe { raw(Syscall::Write, fd as u64, bytes.as_ptr() as u64, bytes.len() as u64) };
    decode(ret).map(|n| n as usize)
}

/// Opens `name` and returns its descriptor.
pub fn open(name: &CStr) -> Result<usize, SysError> {
    // SAFETY: the kernel only reads the NUL-terminated string.
    let ret = unsafe { raw(Syscall::Open, name.as_ptr() as u64, 0, 0) };
    decode(ret).map(|fd| fd as usize)
}

/// Closes descriptor `fd`.
pub fn close(fd: usize) -> Result<(), SysError> {
    // SAFETY: no memory is passed.
    decode(unsafe { raw(Syscall::Close, fd as u64, 0, 0) }).map(|_| ())
}

/// Copies this program's NUL-terminated arguments into `buf`.
pub fn getargs(buf: &mut [u8]) -> Result<(), SysError> {
    // SAFETY: the kernel writes at most `buf.len()` bytes.
    let ret = unsafe { raw(Syscall::GetArgs, buf.as_mut_ptr() as u64, buf.len() as u64, 0) };
    decode(ret).map(|_| ())
}

/// Maps the terminal's text screen and returns its user address.
pub fn vidmap() -> Result<*mut u8, SysError> {
    let mut screen: *mut u8 = core::ptr::null_mut();
    let out = core::ptr::addr_of_mut!(screen);
    // SAFETY: the kernel writes one pointer to `out`.
    decode(unsafe { raw(Syscall::Vidmap, out as u64, 0, 0) })?;
    Ok(screen)
}

/// Splits a raw return value into a count or an error.
pub fn decode(ret: i64) -> Result<u64, SysError> {
    if ret >= 0 {
        return Ok(ret as u64);
    }
    Err(SysError::from_code(ret).unwrap_or(SysError::InvalidArgument))
}

#[cfg(all(target_arch = "x86_64", not(test)))]
unsafe fn raw(call: Syscall, a: u64, b: u64, c: u64) -> i64 {
    let ret: i64;
    core::arch::asm!(
        "int 0x80",
        inlateout("rax") call as u64 => ret,
        in("rdi") a,
        in("rsi") b,
        in("rdx") c,
        lateout("rcx") _,
        lateout("r8") _,
        lateout("r9") _,
        lateout("r10") _,
        lateout("r11") _,
    );
    ret
}

#[cfg(any(not(target_arch = "x86_64"), test))]
unsafe fn raw(_call: Syscall, _a: u64, _b: u64, _c: u64) -> i64 {
    i64::from(SysError::Unsupported.code())
}
