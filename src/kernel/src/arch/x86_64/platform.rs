//! The PC the kernel runs on, behind the hardware traits.

use super::context::{self, Context};
use super::{gdt, pic, timer, vga};
use trine_hal::{Console, Continuations, Cpu, InterruptController, Memory, Mmu, RealTimeClock};
use x86_64::instructions::{interrupts, tlb};
use x86_64::registers::control::{Cr3, Cr3Flags};
use x86_64::structures::paging::PhysFrame;
use x86_64::PhysAddr;

/// Single-CPU x86_64 PC with 8259 PICs, PIT, CMOS RTC and VGA text mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct X86Platform;

impl InterruptController for X86Platform {
    fn enable_irq(&self, irq: u8) {
        pic::enable(irq);
    }

    fn disable_irq(&self, irq: u8) {
        pic::disable(irq);
    }

    fn acknowledge(&self, irq: u8) {
        pic::end_of_interrupt(irq);
    }
}

impl Cpu for X86Platform {
    fn interrupts_enabled(&self) -> bool {
        interrupts::are_enabled()
    }

    fn disable_interrupts(&self) {
        interrupts::disable();
    }

    fn enable_interrupts(&self) {
        interrupts::enable();
    }

    fn wait_for_interrupt(&self) {
        interrupts::enable_and_hlt();
    }

    fn set_kernel_stack(&self, top: u64) {
        gdt::set_kernel_stack(top);
    }
}

impl Mmu for X86Platform {
    unsafe fn load_root(&self, root: u64) {
        Cr3::write(
            PhysFrame::containing_address(PhysAddr::new(root)),
            Cr3Flags::empty(),
        );
    }

    fn flush_tlb(&self) {
        tlb::flush_all();
    }
}

impl Continuations for X86Platform {
    type Continuation = Context;

    unsafe fn switch(&self, save: *mut Context, target: *const Context) {
        context::switch(save, target);
    }

    unsafe fn resume(&self, target: *const Context) -> ! {
        context::resume(target)
    }

    unsafe fn spawn(&self, save: *mut Context, entry: &dyn Fn()) {
        context::spawn(save, entry);
    }

    unsafe fn enter_user(&self, entry: u64, stack_top: u64, exit: *mut Context) -> i32 {
        context::enter_user(entry, stack_top, exit)
    }

    unsafe fn exit_user(&self, exit: *const Context, status: i32) -> ! {
        context::exit_user(exit, status)
    }
}

// Low memory and the kernel window are identity mapped, and the program
// image is reached through the loaded address space.
impl Memory for X86Platform {
    unsafe fn frame(&self, phys: u64) -> *mut u8 {
        phys as *mut u8
    }

    unsafe fn user(&self, virt: u64) -> *mut u8 {
        virt as *mut u8
    }
}

impl Console for X86Platform {
    fn set_cursor(&self, column: usize, row: usize) {
        vga::set_cursor(column, row);
    }
}

impl RealTimeClock for X86Platform {
    fn set_rate(&self, rate: u8) {
        timer::set_rtc_rate(rate);
    }

    fn acknowledge_tick(&self) {
        timer::acknowledge_rtc();
    }
}
