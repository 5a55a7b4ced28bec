//! Interrupt and exception routing.
//!
//! Device interrupts are acknowledged before they are handled, because the
//! timer handler may switch away and only come back much later.

use crate::syscall::Kernel;
use crate::task::TaskId;
use log::error;
use trine_common::syscall::FAULT_STATUS;
use trine_hal::Platform;

/// IRQ line of the programmable interval timer.
pub const TIMER_IRQ: u8 = 0;

/// IRQ line of the PS/2 keyboard.
pub const KEYBOARD_IRQ: u8 = 1;

/// IRQ line of the real-time clock.
pub const RTC_IRQ: u8 = 8;

/// A device interrupt with whatever the handler already read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Timer tick.
    Timer,
    /// A keyboard scancode.
    Keyboard(u8),
    /// Periodic clock interrupt.
    Rtc,
}

impl Interrupt {
    /// Lines the kernel unmasks at boot.
    pub const LINES: [u8; 3] = [TIMER_IRQ, KEYBOARD_IRQ, RTC_IRQ];

    /// IRQ line the interrupt arrives on.
    pub fn irq(self) -> u8 {
        match self {
            Interrupt::Timer => TIMER_IRQ,
            Interrupt::Keyboard(_) => KEYBOARD_IRQ,
            Interrupt::Rtc => RTC_IRQ,
        }
    }
}

/// Names of the architecturally defined exceptions, by vector.
pub const EXCEPTION_NAMES: [&str; 20] = [
    "divide error",
    "debug",
    "non-maskable interrupt",
    "breakpoint",
    "overflow",
    "bound range exceeded",
    "invalid opcode",
    "device not available",
    "double fault",
    "coprocessor segment overrun",
    "invalid TSS",
    "segment not present",
    "stack-segment fault",
    "general protection fault",
    "page fault",
    "reserved",
    "x87 floating-point exception",
    "alignment check",
    "machine check",
    "SIMD floating-point exception",
];

/// Name of exception `vector`.
pub fn exception_name(vector: u8) -> &'static str {
    EXCEPTION_NAMES
        .get(vector as usize)
        .copied()
        .unwrap_or("unknown exception")
}

impl<P: Platform> Kernel<P> {
    /// Handles a device interrupt.
    pub fn handle_interrupt(&self, interrupt: Interrupt) {
        self.platform().acknowledge(interrupt.irq());
        match interrupt {
            Interrupt::Timer => self.on_timer_tick(),
            Interrupt::Keyboard(scancode) => self.on_scancode(scancode),
            Interrupt::Rtc => self.on_clock_tick(),
        }
    }

    /// Handles a CPU exception by killing the current task.
    ///
    /// The task's parent sees [`FAULT_STATUS`]. A fault in the bootstrap
    /// context leaves nothing to return to, so the machine idles.
    pub fn handle_exception(&self, vector: u8) -> ! {
        let current = self.with_state(|state| state.tasks.current());
        error!(
            "{} (vector {}) in task {}",
            exception_name(vector),
            vector,
            current.index()
        );
        if current == TaskId::KERNEL {
            error!("fault in the bootstrap context; halting");
            self.idle()
        }
        self.terminate(FAULT_STATUS)
    }
}
