//! Saved execution state and the transfers between contexts.
//!
//! A suspended context keeps its callee-saved registers on its own stack;
//! [`Context`] only records where that stack stopped. Resuming restores the
//! registers and returns into whichever transfer saved it.

use super::gdt;
use core::arch::global_asm;
use log::error;

/// Kernel stack pointer of a suspended context.
#[derive(Debug, Default)]
#[repr(C)]
pub struct Context {
    rsp: u64,
}

extern "C" {
    fn trine_switch(save: *mut Context, target: *const Context);
    fn trine_resume(target: *const Context) -> !;
    fn trine_spawn(save: *mut Context, arg: *const (), entry: extern "C" fn(*const ()) -> !);
    fn trine_enter_user(
        entry: u64,
        stack_top: u64,
        exit: *mut Context,
        code_selector: u64,
        stack_selector: u64,
    ) -> i32;
    fn trine_exit_user(exit: *const Context, status: i32) -> !;
}

global_asm!(
    r#"
    .section .text

    # rdi = save, rsi = target
    .global trine_switch
    .type trine_switch, @function
trine_switch:
    push rbp
    push rbx
    push r12
    push r13
    push r14
    push r15
    mov [rdi], rsp
    mov rsp, [rsi]
    pop r15
    pop r14
    pop r13
    pop r12
    pop rbx
    pop rbp
    ret

    # rdi = target
    .global trine_resume
    .type trine_resume, @function
trine_resume:
    mov rsp, [rdi]
    pop r15
    pop r14
    pop r13
    pop r12
    pop rbx
    pop rbp
    ret

    # rdi = save, rsi = arg, rdx = entry
    .global trine_spawn
    .type trine_spawn, @function
trine_spawn:
    push rbp
    push rbx
    push r12
    push r13
    push r14
    push r15
    mov [rdi], rsp
    mov rdi, rsi
    sub rsp, 8
    call rdx
    ud2

    # rdi = entry, rsi = user stack, rdx = exit, rcx = user code, r8 = user stack segment
    .global trine_enter_user
    .type trine_enter_user, @function
trine_enter_user:
    push rbp
    push rbx
    push r12
    push r13
    push r14
    push r15
    mov [rdx], rsp
    push r8
    push rsi
    push 0x202
    push rcx
    push rdi
    iretq

    # rdi = exit, esi = status
    .global trine_exit_user
    .type trine_exit_user, @function
trine_exit_user:
    mov eax, esi
    mov rsp, [rdi]
    pop r15
    pop r14
    pop r13
    pop r12
    pop rbx
    pop rbp
    ret
"#
);

/// Saves into `save` and continues `target`.
///
/// # Safety
///
/// See [`trine_hal::Continuations::switch`].
pub unsafe fn switch(save: *mut Context, target: *const Context) {
    trine_switch(save, target)
}

/// Continues `target`, abandoning the running context.
///
/// # Safety
///
/// `target` must have been filled by a save.
pub unsafe fn resume(target: *const Context) -> ! {
    trine_resume(target)
}

extern "C" fn run_spawned(arg: *const ()) -> ! {
    // SAFETY: `arg` points at the `&dyn Fn()` held by the suspended `spawn`
    // frame, which stays intact above this one.
    let entry = unsafe { *arg.cast::<&dyn Fn()>() };
    entry();
    error!("spawned context returned");
    super::halt_loop()
}

/// Saves into `save`, then runs `entry` below the current frame.
///
/// # Safety
///
/// `save` must stay valid until it is resumed.
pub unsafe fn spawn(save: *mut Context, entry: &dyn Fn()) {
    let entry: *const &dyn Fn() = &entry;
    trine_spawn(save, entry.cast(), run_spawned)
}

/// Drops to ring 3 at `entry`; returns the status of the matching exit.
///
/// # Safety
///
/// The program image must be mapped and `exit` must stay valid until the
/// exit that resumes it.
pub unsafe fn enter_user(entry: u64, stack_top: u64, exit: *mut Context) -> i32 {
    let selectors = gdt::selectors();
    trine_enter_user(
        entry,
        stack_top,
        exit,
        u64::from(selectors.user_code.0),
        u64::from(selectors.user_data.0),
    )
}

/// Resumes the `enter_user` that saved `exit`, making it return `status`.
///
/// # Safety
///
/// `exit` must have been filled by [`enter_user`].
pub unsafe fn exit_user(exit: *const Context, status: i32) -> ! {
    trine_exit_user(exit, status)
}
