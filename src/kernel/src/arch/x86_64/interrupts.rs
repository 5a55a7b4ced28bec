//! Interrupt Descriptor Table (IDT), exception handlers and the system
//! call gate for x86_64.

use super::gdt;
use super::pic;
use super::KERNEL;
use crate::interrupts::{Interrupt, KEYBOARD_IRQ, RTC_IRQ, TIMER_IRQ};
use core::arch::global_asm;
use lazy_static::lazy_static;
use log::{debug, error};
use trine_common::syscall::SYSCALL_VECTOR;
use x86_64::instructions::port::Port;
use x86_64::registers::control::Cr2;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};
use x86_64::{PrivilegeLevel, VirtAddr};

/// PS/2 controller data port.
const KEYBOARD_DATA_PORT: u16 = 0x60;

extern "C" {
    fn trine_syscall_entry();
}

// rax = ordinal, rdi/rsi/rdx = arguments; the result returns in rax.
global_asm!(
    r#"
    .section .text
    .global trine_syscall_entry
    .type trine_syscall_entry, @function
trine_syscall_entry:
    push rcx
    push rdx
    push rsi
    push rdi
    push r8
    push r9
    push r10
    push r11
    mov rcx, rdx
    mov rdx, rsi
    mov rsi, rdi
    mov rdi, rax
    sub rsp, 8
    call trine_syscall_dispatch
    add rsp, 8
    pop r11
    pop r10
    pop r9
    pop r8
    pop rdi
    pop rsi
    pop rdx
    pop rcx
    iretq
"#
);

#[no_mangle]
extern "C" fn trine_syscall_dispatch(number: u64, a: u64, b: u64, c: u64) -> i64 {
    KERNEL.syscall(number, a, b, c)
}

macro_rules! exception {
    ($name:ident, $vector:expr) => {
        extern "x86-interrupt" fn $name(_frame: InterruptStackFrame) {
            KERNEL.handle_exception($vector)
        }
    };
    ($name:ident, $vector:expr, error_code) => {
        extern "x86-interrupt" fn $name(_frame: InterruptStackFrame, error_code: u64) {
            debug!("error code {:#x}", error_code);
            KERNEL.handle_exception($vector)
        }
    };
}

exception!(divide_error, 0);
exception!(debug_exception, 1);
exception!(non_maskable_interrupt, 2);
exception!(breakpoint, 3);
exception!(overflow, 4);
exception!(bound_range_exceeded, 5);
exception!(invalid_opcode, 6);
exception!(device_not_available, 7);
exception!(invalid_tss, 10, error_code);
exception!(segment_not_present, 11, error_code);
exception!(stack_segment_fault, 12, error_code);
exception!(general_protection_fault, 13, error_code);
exception!(x87_floating_point, 16);
exception!(alignment_check, 17, error_code);
exception!(simd_floating_point, 19);

extern "x86-interrupt" fn double_fault(frame: InterruptStackFrame, _error_code: u64) -> ! {
    error!("double fault\n{:#?}", frame);
    KERNEL.handle_exception(8)
}

extern "x86-interrupt" fn page_fault(_frame: InterruptStackFrame, error_code: PageFaultErrorCode) {
    error!("page fault at {:?} ({:?})", Cr2::read(), error_code);
    KERNEL.handle_exception(14)
}

extern "x86-interrupt" fn machine_check(_frame: InterruptStackFrame) -> ! {
    KERNEL.handle_exception(18)
}

extern "x86-interrupt" fn timer(_frame: InterruptStackFrame) {
    KERNEL.handle_interrupt(Interrupt::Timer);
}

extern "x86-interrupt" fn keyboard(_frame: InterruptStackFrame) {
    let mut port = Port::new(KEYBOARD_DATA_PORT);
    // SAFETY: reading the PS/2 data port has no side effect beyond
    // consuming the scancode that raised this interrupt.
    let scancode: u8 = unsafe { port.read() };
    KERNEL.handle_interrupt(Interrupt::Keyboard(scancode));
}

extern "x86-interrupt" fn rtc(_frame: InterruptStackFrame) {
    KERNEL.handle_interrupt(Interrupt::Rtc);
}

lazy_static! {
    /// The Interrupt Descriptor Table (IDT).
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.divide_error.set_handler_fn(divide_error);
        idt.debug.set_handler_fn(debug_exception);
        idt.non_maskable_interrupt.set_handler_fn(non_maskable_interrupt);
        idt.breakpoint.set_handler_fn(breakpoint);
        idt.overflow.set_handler_fn(overflow);
        idt.bound_range_exceeded.set_handler_fn(bound_range_exceeded);
        idt.invalid_opcode.set_handler_fn(invalid_opcode);
        idt.device_not_available.set_handler_fn(device_not_available);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
        }
        idt.invalid_tss.set_handler_fn(invalid_tss);
        idt.segment_not_present.set_handler_fn(segment_not_present);
        idt.stack_segment_fault.set_handler_fn(stack_segment_fault);
        idt.general_protection_fault.set_handler_fn(general_protection_fault);
        idt.page_fault.set_handler_fn(page_fault);
        idt.x87_floating_point.set_handler_fn(x87_floating_point);
        idt.alignment_check.set_handler_fn(alignment_check);
        idt.machine_check.set_handler_fn(machine_check);
        idt.simd_floating_point.set_handler_fn(simd_floating_point);

        // Hardware interrupts
        idt[usize::from(pic::vector(TIMER_IRQ))].set_handler_fn(timer);
        idt[usize::from(pic::vector(KEYBOARD_IRQ))].set_handler_fn(keyboard);
        idt[usize::from(pic::vector(RTC_IRQ))].set_handler_fn(rtc);

        // SAFETY: the stub preserves every register but rax and returns
        // with iretq.
        unsafe {
            idt[usize::from(SYSCALL_VECTOR)]
                .set_handler_addr(VirtAddr::new(trine_syscall_entry as usize as u64))
                .set_privilege_level(PrivilegeLevel::Ring3);
        }

        idt
    };
}

/// Loads the IDT and remaps the PICs with every line masked.
pub fn init() {
    IDT.load();
    pic::init();
}
