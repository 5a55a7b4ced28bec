//! Trine kernel
//!
//! A small preemptive multitasking kernel for x86_64: per-task address
//! spaces, a fixed task pool, round-robin scheduling over three virtual
//! terminals, and a descriptor-based system call layer.
//!
//! # Architecture
//!
//! The kernel is structured into the following modules:
//! - `paging`: per-slot page tables
//! - `task`: task control blocks and the task pool
//! - `sched`: the ready queue
//! - `syscall`: the task lifecycle and system calls
//! - `interrupts`: device interrupt and exception routing
//! - `device`, `fs`, `terminal`: descriptor backends
//! - `arch`: the bare-metal platform (only built for `target_os = "none"`)
//!
//! The core is generic over [`trine_hal::Platform`], so everything but
//! `arch` also runs on the host under test.
//!
//! # Safety
//!
//! This is a `#![no_std]` kernel. All unsafe code is documented with safety
//! invariants explaining why the usage is correct.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_os = "none", feature(abi_x86_interrupt))]
#![warn(missing_docs)]

#[cfg(target_os = "none")]
pub mod arch;
pub mod config;
pub mod device;
pub mod fs;
pub mod interrupts;
pub mod logging;
pub mod paging;
pub mod sched;
pub mod syscall;
pub mod task;
pub mod terminal;

#[cfg(test)]
pub mod testutil;
