//! Trine Hardware Abstraction Layer (HAL) traits.
//!
//! The kernel core is written against these traits only. The bare-metal
//! build implements them for x86_64; unit tests implement them with a
//! recording mock.

#![no_std]

/// Trait for the programmable interrupt controller.
pub trait InterruptController {
    /// Unmasks IRQ line `irq`.
    fn enable_irq(&self, irq: u8);
    /// Masks IRQ line `irq`.
    fn disable_irq(&self, irq: u8);
    /// Signals the end of an interrupt on line `irq`.
    fn acknowledge(&self, irq: u8);
}

/// Trait for CPU-wide state of the single execution stream.
pub trait Cpu {
    /// Returns true if maskable interrupts are currently delivered.
    fn interrupts_enabled(&self) -> bool;
    /// Masks interrupts.
    fn disable_interrupts(&self);
    /// Unmasks interrupts.
    fn enable_interrupts(&self);
    /// Unmasks interrupts and idles until the next one arrives.
    fn wait_for_interrupt(&self);
    /// Sets the stack used to re-enter kernel mode on the next trap.
    fn set_kernel_stack(&self, top: u64);

    /// Runs `f` with interrupts masked, restoring the previous state after.
    fn without_interrupts<R>(&self, f: impl FnOnce() -> R) -> R {
        let enabled = self.interrupts_enabled();
        if enabled {
            self.disable_interrupts();
        }
        let result = f();
        if enabled {
            self.enable_interrupts();
        }
        result
    }
}

/// Trait for the paging unit.
pub trait Mmu {
    /// Installs the top-level table at physical address `root`.
    ///
    /// # Safety
    ///
    /// `root` must point at a table hierarchy that maps the running kernel.
    unsafe fn load_root(&self, root: u64);
    /// Flushes the translation cache.
    fn flush_tlb(&self);
}

/// Saved execution state and the transfers between them.
///
/// A continuation is opaque to the kernel: it is only ever filled by a save
/// and consumed by a transfer. Every transfer expects interrupts masked.
pub trait Continuations {
    /// Platform-specific saved execution state.
    type Continuation: Default + Send;

    /// Saves the running context into `save` and resumes `target`.
    ///
    /// Returns when some later transfer resumes `save`.
    ///
    /// # Safety
    ///
    /// Both pointers must stay valid until the transfer back; `target` must
    /// have been filled by an earlier save.
    unsafe fn switch(&self, save: *mut Self::Continuation, target: *const Self::Continuation);

    /// Resumes `target`, abandoning the running context.
    ///
    /// # Safety
    ///
    /// `target` must have been filled by an earlier save.
    unsafe fn resume(&self, target: *const Self::Continuation) -> !;

    /// Saves the running context into `save`, then runs `entry` on the
    /// current stack. `entry` is not expected to return; the call returns when
    /// a later transfer resumes `save`.
    ///
    /// # Safety
    ///
    /// `save` must stay valid until it is resumed.
    unsafe fn spawn(&self, save: *mut Self::Continuation, entry: &dyn Fn());

    /// Saves the running context into `exit`, then drops to user mode at
    /// `entry` with the stack at `stack_top`. Returns the status handed to
    /// [`Continuations::exit_user`] for `exit`.
    ///
    /// # Safety
    ///
    /// The program image must be mapped in the loaded address space.
    unsafe fn enter_user(&self, entry: u64, stack_top: u64, exit: *mut Self::Continuation) -> i32;

    /// Resumes `exit`, making its [`Continuations::enter_user`] return
    /// `status`.
    ///
    /// # Safety
    ///
    /// `exit` must have been filled by `enter_user`.
    unsafe fn exit_user(&self, exit: *const Self::Continuation, status: i32) -> !;
}

/// Trait for reaching memory the kernel does not own as Rust objects.
pub trait Memory {
    /// Returns a pointer to the 4 KiB physical frame at `phys`.
    ///
    /// # Safety
    ///
    /// `phys` must be a frame reachable from the kernel window.
    unsafe fn frame(&self, phys: u64) -> *mut u8;

    /// Returns a pointer to `virt` in the currently loaded address space.
    ///
    /// # Safety
    ///
    /// `virt` must be mapped in the loaded address space.
    unsafe fn user(&self, virt: u64) -> *mut u8;
}

/// Trait for the text console hardware.
pub trait Console {
    /// Moves the hardware cursor.
    fn set_cursor(&self, column: usize, row: usize);
}

/// Trait for the periodic real-time-clock interrupt source.
pub trait RealTimeClock {
    /// Programs the periodic rate divider (3..=15).
    fn set_rate(&self, rate: u8);
    /// Re-arms the chip after a periodic interrupt.
    fn acknowledge_tick(&self);
}

/// Everything the kernel core needs from the machine.
pub trait Platform:
    InterruptController + Cpu + Mmu + Continuations + Memory + Console + RealTimeClock + Sync
{
}

impl<T> Platform for T where
    T: InterruptController + Cpu + Mmu + Continuations + Memory + Console + RealTimeClock + Sync
{
}
