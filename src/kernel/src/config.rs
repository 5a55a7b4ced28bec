//! Compile-time configuration: memory layout, pool sizes and build knobs.
//!
//! Every address below lies in the first GiB, which each task's single page
//! directory covers.

use log::LevelFilter;

/// Task slots, including the bootstrap context in slot 0.
pub const MAX_TASKS: usize = 7;

/// Number of virtual terminals.
pub const TERMINALS: usize = 3;

/// Descriptors per task; 0 and 1 are the terminal's input and output.
pub const MAX_FILES: usize = 8;

/// First general-purpose descriptor.
pub const FIRST_FREE_FD: usize = 2;

/// Argument tail capacity in bytes.
pub const ARG_CAPACITY: usize = 128;

/// Program and file name capacity in bytes.
pub const NAME_CAPACITY: usize = 32;

/// Keyboard line buffer size, including the trailing newline.
pub const LINE_CAPACITY: usize = 128;

/// Ready queue length.
pub const READY_QUEUE_CAPACITY: usize = MAX_TASKS;

/// Size of a small page.
pub const PAGE_SIZE: u64 = 0x1000;

/// Size of a large page: one program image or the kernel window.
pub const LARGE_PAGE_SIZE: u64 = 0x40_0000;

/// Kernel code, data and stacks, identity mapped.
pub const KERNEL_WINDOW_BASE: u64 = 0x40_0000;

/// Live text-mode video memory.
pub const VIDEO_MEMORY: u64 = 0xB8000;

/// Backing frame of terminal 0; terminals 1 and 2 follow.
pub const TERMINAL_BACKING_BASE: u64 = 0xB9000;

/// Virtual base of every program image.
pub const PROGRAM_IMAGE_VIRT: u64 = 0x0800_0000;

/// Physical base of the image belonging to task slot 1.
pub const PROGRAM_IMAGE_PHYS_BASE: u64 = 0x80_0000;

/// Offset inside the image where the executable is copied.
pub const PROGRAM_LOAD_OFFSET: u64 = 0x48000;

/// Offset inside the executable of its little-endian entry address.
pub const ENTRY_POINT_OFFSET: usize = 24;

/// Leading bytes every executable must carry.
pub const EXECUTABLE_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Initial user stack pointer.
pub const USER_STACK_TOP: u64 = PROGRAM_IMAGE_VIRT + LARGE_PAGE_SIZE - 8;

/// Where `vidmap` exposes a terminal's screen to user programs.
pub const VIDMAP_VIRT: u64 = PROGRAM_IMAGE_VIRT + LARGE_PAGE_SIZE + VIDEO_MEMORY;

/// Per-task kernel stack size.
pub const KERNEL_STACK_SIZE: u64 = 0x4000;

/// Kernel stacks grow down from the end of the kernel window.
pub const KERNEL_STACK_TOP: u64 = KERNEL_WINDOW_BASE + LARGE_PAGE_SIZE;

/// PIT reload value for a tick of roughly 10 ms.
pub const PIT_RELOAD: u16 = 11931;

/// Periodic clock frequency programmed at boot.
pub const BOOT_CLOCK_HZ: u32 = 2;

/// Names starting with this prefix open the clock device.
pub const CLOCK_NAME: &[u8] = b"rtc";

/// Program started on every terminal.
pub const SHELL: &[u8] = b"shell";

/// Upper bound on user strings passed by pointer.
pub const USER_STRING_LIMIT: usize = 1024;

/// Physical base of the image for task slot `id` (1-based).
pub const fn program_image_phys(id: usize) -> u64 {
    PROGRAM_IMAGE_PHYS_BASE + (id as u64 - 1) * LARGE_PAGE_SIZE
}

/// Top of the kernel stack belonging to task slot `id`.
pub const fn kernel_stack_top(id: usize) -> u64 {
    KERNEL_STACK_TOP - id as u64 * KERNEL_STACK_SIZE
}

/// Backing frame of terminal `index`.
pub const fn terminal_backing(index: usize) -> u64 {
    TERMINAL_BACKING_BASE + index as u64 * PAGE_SIZE
}

/// Log level selected at build time through `TRINE_LOG`.
pub fn log_level() -> LevelFilter {
    parse_level(option_env!("TRINE_LOG").unwrap_or("info"))
}

fn parse_level(name: &str) -> LevelFilter {
    match name {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}
