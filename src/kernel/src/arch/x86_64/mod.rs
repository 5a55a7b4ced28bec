//! x86_64 architecture support.
//!
//! Implements the hardware traits for a single-CPU PC and owns the live
//! kernel instance that interrupt handlers dispatch to.

pub mod context;
pub mod gdt;
pub mod interrupts;
pub mod pic;
pub mod platform;
pub mod serial;
pub mod timer;
pub mod vga;

pub use platform::X86Platform;

use crate::syscall::Kernel;

/// The running kernel.
pub static KERNEL: Kernel<X86Platform> = Kernel::new(X86Platform);

/// Brings up the serial port, descriptor tables, PICs and timers.
///
/// Every IRQ line stays masked until [`Kernel::boot`].
pub fn init() {
    serial::init();
    gdt::init();
    interrupts::init();
    timer::init_pit();
    timer::enable_rtc();
}

/// Halts the CPU until the next interrupt.
#[inline]
pub fn hlt() {
    x86_64::instructions::hlt();
}

/// Halts the CPU in an infinite loop.
///
/// Used after unrecoverable errors (panics).
pub fn halt_loop() -> ! {
    loop {
        hlt();
    }
}
