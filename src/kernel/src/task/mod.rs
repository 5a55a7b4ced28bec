//! Task control blocks and the fixed task pool.
//!
//! Slot 0 belongs to the bootstrap context: the kernel's own thread of
//! execution that starts the first shell. Slots 1.. host user programs.

use crate::config::{self, ARG_CAPACITY, MAX_TASKS, NAME_CAPACITY};
use crate::device::FileTable;
use crate::terminal::TerminalId;
use trine_common::SysError;
use trine_hal::Cpu;

/// Index of a task slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskId(u8);

impl TaskId {
    /// The bootstrap context.
    pub const KERNEL: TaskId = TaskId(0);

    /// Returns the id for slot `index`, if the pool has one.
    pub const fn new(index: usize) -> Option<Self> {
        if index < MAX_TASKS {
            Some(TaskId(index as u8))
        } else {
            None
        }
    }

    /// Slot index.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Scheduling state of an occupied slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// The current task.
    Running,
    /// In the ready queue.
    Ready,
    /// Suspended in `execute` until its child exits.
    Waiting,
}

/// A command line split into program name and argument tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command<'a> {
    /// Program name, at most 32 bytes.
    pub name: &'a [u8],
    /// Everything after the name, leading spaces removed.
    pub args: &'a [u8],
}

impl<'a> Command<'a> {
    /// Splits `line`, which ends at its first NUL if it has one.
    pub fn parse(line: &'a [u8]) -> Self {
        let end = line.iter().position(|&b| b == 0).unwrap_or(line.len());
        let line = skip_spaces(&line[..end]);
        let name_end = line.iter().position(|&b| b == b' ').unwrap_or(line.len());
        let name = &line[..name_end.min(NAME_CAPACITY)];
        let args = skip_spaces(&line[name_end..]);
        Command {
            name,
            args: &args[..args.len().min(ARG_CAPACITY)],
        }
    }
}

fn skip_spaces(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != b' ').unwrap_or(bytes.len());
    &bytes[start..]
}

/// Argument tail captured at `execute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Args {
    bytes: [u8; ARG_CAPACITY],
    len: usize,
}

impl Args {
    /// No arguments.
    pub const EMPTY: Args = Args {
        bytes: [0; ARG_CAPACITY],
        len: 0,
    };

    /// Captures `tail`, truncated to the argument capacity.
    pub fn new(tail: &[u8]) -> Self {
        let mut args = Self::EMPTY;
        args.len = tail.len().min(ARG_CAPACITY);
        args.bytes[..args.len].copy_from_slice(&tail[..args.len]);
        args
    }

    /// The captured bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Copies the arguments out, NUL-terminated when room remains.
    pub fn copy_to(&self, buf: &mut [u8]) -> Result<(), SysError> {
        if self.len == 0 || self.len > buf.len() {
            return Err(SysError::InvalidArgument);
        }
        buf[..self.len].copy_from_slice(self.as_bytes());
        if let Some(terminator) = buf.get_mut(self.len) {
            *terminator = 0;
        }
        Ok(())
    }
}

/// Task control block.
#[derive(Debug)]
pub struct Tcb<C> {
    /// Descriptor table.
    pub files: FileTable,
    /// Task resumed when this one exits.
    pub parent: TaskId,
    /// Terminal the task's descriptors 0 and 1 talk to.
    pub terminal: TerminalId,
    /// Argument tail.
    pub args: Args,
    /// User entry point of the loaded image.
    pub entry: u64,
    /// Scheduling state.
    pub state: TaskState,
    /// Saved by timer switches and terminal spawns.
    pub sched: C,
    /// Saved by `execute` while a child runs.
    pub exit: C,
}

impl<C: Default> Tcb<C> {
    /// A fresh block with nothing open.
    pub fn new(parent: TaskId, terminal: TerminalId) -> Self {
        Tcb {
            files: FileTable::new(),
            parent,
            terminal,
            args: Args::EMPTY,
            entry: 0,
            state: TaskState::Ready,
            sched: C::default(),
            exit: C::default(),
        }
    }
}

/// Fixed pool of task slots plus the current task.
#[derive(Debug)]
pub struct TaskTable<C> {
    slots: [Option<Tcb<C>>; MAX_TASKS],
    current: TaskId,
}

impl<C: Default> TaskTable<C> {
    /// An empty pool; [`TaskTable::install_bootstrap`] fills slot 0.
    pub const fn new() -> Self {
        TaskTable {
            slots: [const { None }; MAX_TASKS],
            current: TaskId::KERNEL,
        }
    }

    /// Occupies slot 0 with the running bootstrap context.
    pub fn install_bootstrap(&mut self) {
        let mut tcb = Tcb::new(TaskId::KERNEL, TerminalId::FIRST);
        tcb.state = TaskState::Running;
        self.slots[0] = Some(tcb);
        self.current = TaskId::KERNEL;
    }

    /// Occupies the first free user slot.
    pub fn allocate(&mut self, parent: TaskId, terminal: TerminalId) -> Result<TaskId, SysError> {
        let index = (1..MAX_TASKS)
            .find(|&index| self.slots[index].is_none())
            .ok_or(SysError::ResourceExhausted)?;
        self.slots[index] = Some(Tcb::new(parent, terminal));
        Ok(TaskId(index as u8))
    }

    /// Frees `id`. The bootstrap slot is never released.
    pub fn release(&mut self, id: TaskId) {
        if id != TaskId::KERNEL {
            self.slots[id.index()] = None;
        }
    }

    /// Makes `id` current and points kernel re-entry at its stack.
    pub fn activate(&mut self, id: TaskId, cpu: &impl Cpu) {
        self.current = id;
        cpu.set_kernel_stack(config::kernel_stack_top(id.index()));
    }
}

impl<C> TaskTable<C> {
    /// The current task.
    pub fn current(&self) -> TaskId {
        self.current
    }

    /// The block of `id`, if occupied.
    pub fn lookup(&self, id: TaskId) -> Option<&Tcb<C>> {
        self.slots[id.index()].as_ref()
    }

    /// Mutable block of `id`, if occupied.
    pub fn lookup_mut(&mut self, id: TaskId) -> Option<&mut Tcb<C>> {
        self.slots[id.index()].as_mut()
    }

    /// Block of the current task.
    pub fn current_tcb(&self) -> Result<&Tcb<C>, SysError> {
        self.lookup(self.current).ok_or(SysError::Fault)
    }

    /// Mutable block of the current task.
    pub fn current_tcb_mut(&mut self) -> Result<&mut Tcb<C>, SysError> {
        let current = self.current;
        self.lookup_mut(current).ok_or(SysError::Fault)
    }

    /// Ids of occupied slots.
    pub fn occupied(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| TaskId(index as u8))
    }

    /// Whether every slot is taken.
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }
}

impl<C: Default> Default for TaskTable<C> {
    fn default() -> Self {
        Self::new()
    }
}
