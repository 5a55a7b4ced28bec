//! Virtual real-time clock.
//!
//! The hardware periodic interrupt is shared; each task sees its own tick
//! flag, set on every interrupt and consumed by a read.

use crate::config::MAX_TASKS;
use crate::task::TaskId;
use trine_common::SysError;

/// Base frequency of the periodic divider.
const BASE_HZ: u32 = 32768;

/// Slowest rate index the chip accepts.
const SLOWEST_RATE: u8 = 15;

/// Fastest rate index the kernel allows.
const FASTEST_RATE: u8 = 3;

/// Per-task tick flags.
#[derive(Debug)]
pub struct VirtualClock {
    open: [bool; MAX_TASKS],
    ticked: [bool; MAX_TASKS],
}

impl VirtualClock {
    /// No task has the clock open.
    pub const fn new() -> Self {
        VirtualClock {
            open: [false; MAX_TASKS],
            ticked: [false; MAX_TASKS],
        }
    }

    /// Opens the clock for `task` with no tick pending.
    pub fn open(&mut self, task: TaskId) {
        self.open[task.index()] = true;
        self.ticked[task.index()] = false;
    }

    /// Closes the clock for `task`.
    pub fn close(&mut self, task: TaskId) {
        self.open[task.index()] = false;
    }

    /// Whether `task` has the clock open.
    pub fn is_open(&self, task: TaskId) -> bool {
        self.open[task.index()]
    }

    /// Records a hardware tick for every task.
    pub fn tick(&mut self) {
        self.ticked = [true; MAX_TASKS];
    }

    /// Consumes `task`'s pending tick.
    pub fn take_tick(&mut self, task: TaskId) -> bool {
        core::mem::replace(&mut self.ticked[task.index()], false)
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Rate index producing `frequency` interrupts per second.
///
/// Accepts 2 up to (not including) 32768 Hz. Frequencies past the fastest
/// allowed rate are clamped to it.
pub fn rate_for(frequency: u32) -> Result<u8, SysError> {
    if !(2..BASE_HZ).contains(&frequency) {
        return Err(SysError::InvalidArgument);
    }
    let mut rate = SLOWEST_RATE;
    let mut remaining = frequency;
    while remaining > 2 && rate >= FASTEST_RATE + 1 {
        remaining /= 2;
        rate -= 1;
    }
    Ok(rate)
}

#[cfg(test)]
fn frequency_of(rate: u8) -> u32 {
    BASE_HZ >> rate.saturating_sub(1)
}
