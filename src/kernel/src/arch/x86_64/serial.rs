//! COM1 output for the kernel log and panic reports.

use core::fmt::{self, Write};
use spin::{Mutex, Once};
use uart_16550::SerialPort;
use x86_64::instructions::interrupts;

const COM1: u16 = 0x3F8;

static PORT: Once<Mutex<SerialPort>> = Once::new();

fn port() -> &'static Mutex<SerialPort> {
    PORT.call_once(|| {
        // SAFETY: nothing else drives the COM1 registers.
        let mut port = unsafe { SerialPort::new(COM1) };
        port.init();
        Mutex::new(port)
    })
}

/// Programs the UART. Later calls do nothing.
pub fn init() {
    port();
}

/// Formats `args` onto COM1 with interrupts masked.
///
/// Output is best effort; a failed write is dropped.
pub fn write_log(args: fmt::Arguments<'_>) {
    interrupts::without_interrupts(|| {
        let _ = port().lock().write_fmt(args);
    });
}

/// Writes a report after a panic, even if the panicking code held the port.
pub fn write_panic(args: fmt::Arguments<'_>) {
    interrupts::disable();
    let port = port();
    if port.is_locked() {
        // SAFETY: interrupts are off and the panicking context never
        // returns to the writer it interrupted.
        unsafe { port.force_unlock() };
    }
    let _ = port.lock().write_fmt(args);
}

/// Prints a line to COM1.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::arch::x86_64::serial::write_log(format_args!("\n")));
    ($($arg:tt)*) => ($crate::arch::x86_64::serial::write_log(format_args!("{}\n", format_args!($($arg)*))));
}
