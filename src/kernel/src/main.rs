//! Trine Kernel Entry Point
//!
//! The bootloader jumps to `kernel_main`, which brings up the machine,
//! mounts the embedded boot file store and starts the shell on terminal 0.
//! The image path comes from `TRINE_FS_IMAGE` at build time.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod bare_metal {
    use bootloader::{entry_point, BootInfo};
    use core::panic::PanicInfo;
    use log::{error, info};
    use spin::Once;
    use trine_kernel::arch::x86_64::{self as arch, serial, KERNEL};
    use trine_kernel::config::{self, SHELL};
    use trine_kernel::fs::BootFs;
    use trine_kernel::{logging, serial_println};

    static FS_IMAGE: &[u8] = include_bytes!(env!("TRINE_FS_IMAGE"));

    static STORE: Once<BootFs<'static>> = Once::new();

    entry_point!(kernel_main);

    /// Kernel entry point.
    fn kernel_main(_boot_info: &'static BootInfo) -> ! {
        arch::init();
        if logging::init(serial::write_log, config::log_level()).is_err() {
            serial_println!("logger already installed");
        }

        match BootFs::new(FS_IMAGE) {
            Ok(fs) => KERNEL.mount(STORE.call_once(|| fs)),
            Err(err) => {
                error!("boot file store unreadable: {}", err);
                arch::halt_loop()
            }
        }

        KERNEL.boot();
        info!("starting the shell");
        match KERNEL.execute(SHELL) {
            Ok(status) => error!("shell returned {}", status),
            Err(err) => error!("cannot start the shell: {}", err),
        }
        KERNEL.idle()
    }

    /// Panic handler.
    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        serial::write_panic(format_args!("KERNEL PANIC: {}\n", info));
        arch::halt_loop()
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("trine-kernel boots on bare metal only; build it for a `target_os = \"none\"` x86_64 target");
}
