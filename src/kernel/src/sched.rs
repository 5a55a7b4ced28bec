//! Round-robin scheduling.
//!
//! The ready queue is a bounded FIFO of task ids. A task is never queued
//! while it runs: the scheduler pops the next task before queueing the one
//! it replaces.

use crate::config::READY_QUEUE_CAPACITY;
use crate::task::{TaskId, TaskState, TaskTable};

/// Bounded circular FIFO of task ids.
#[derive(Debug)]
pub struct ReadyQueue<const N: usize> {
    slots: [TaskId; N],
    head: usize,
    len: usize,
}

impl<const N: usize> ReadyQueue<N> {
    /// An empty queue.
    pub const fn new() -> Self {
        ReadyQueue {
            slots: [TaskId::KERNEL; N],
            head: 0,
            len: 0,
        }
    }

    /// Appends `id`; returns false when the queue is full.
    pub fn push(&mut self, id: TaskId) -> bool {
        if self.len == N {
            return false;
        }
        self.slots[(self.head + self.len) % N] = id;
        self.len += 1;
        true
    }

    /// Removes the oldest id.
    pub fn pop(&mut self) -> Option<TaskId> {
        if self.len == 0 {
            return None;
        }
        let id = self.slots[self.head];
        self.head = (self.head + 1) % N;
        self.len -= 1;
        Some(id)
    }

    /// Drops `id` wherever it sits, keeping the order of the rest.
    pub fn remove(&mut self, id: TaskId) -> bool {
        let Some(position) = self.iter().position(|queued| queued == id) else {
            return false;
        };
        for offset in position..self.len - 1 {
            self.slots[(self.head + offset) % N] = self.slots[(self.head + offset + 1) % N];
        }
        self.len -= 1;
        true
    }

    /// Ids from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = TaskId> + '_ {
        (0..self.len).map(move |offset| self.slots[(self.head + offset) % N])
    }

    /// Whether `id` is queued.
    pub fn contains(&self, id: TaskId) -> bool {
        self.iter().any(|queued| queued == id)
    }

    /// Number of queued ids.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const N: usize> Default for ReadyQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Ready queue plus the state bookkeeping around it.
#[derive(Debug, Default)]
pub struct Scheduler {
    ready: ReadyQueue<READY_QUEUE_CAPACITY>,
}

impl Scheduler {
    /// Nothing ready.
    pub const fn new() -> Self {
        Scheduler {
            ready: ReadyQueue::new(),
        }
    }

    /// Rotates on a timer tick.
    ///
    /// Queues the current task behind the others and returns the task to
    /// run instead, or `None` when nothing else is ready. Does not change
    /// the current task; the caller activates the returned one.
    pub fn preempt<C>(&mut self, tasks: &mut TaskTable<C>) -> Option<TaskId> {
        let next = self.ready.pop()?;
        let current = tasks.current();
        self.enqueue(tasks, current);
        if let Some(tcb) = tasks.lookup_mut(next) {
            tcb.state = TaskState::Running;
        }
        Some(next)
    }

    /// Queues `id` at the tail and marks it ready.
    pub fn enqueue<C>(&mut self, tasks: &mut TaskTable<C>, id: TaskId) {
        if self.ready.contains(id) {
            return;
        }
        let queued = self.ready.push(id);
        debug_assert!(queued, "ready queue holds every task slot");
        if let Some(tcb) = tasks.lookup_mut(id) {
            tcb.state = TaskState::Ready;
        }
    }

    /// Pops the next task and marks it running, leaving the caller out of
    /// the rotation.
    pub fn take_next<C>(&mut self, tasks: &mut TaskTable<C>) -> Option<TaskId> {
        let next = self.ready.pop()?;
        if let Some(tcb) = tasks.lookup_mut(next) {
            tcb.state = TaskState::Running;
        }
        Some(next)
    }

    /// Drops `id` from the rotation.
    pub fn remove(&mut self, id: TaskId) -> bool {
        self.ready.remove(id)
    }

    /// Whether `id` is waiting for its turn.
    pub fn is_ready(&self, id: TaskId) -> bool {
        self.ready.contains(id)
    }

    /// Ids in the order they will run.
    pub fn queued(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.ready.iter()
    }

    /// Whether nothing else can run.
    pub fn is_idle(&self) -> bool {
        self.ready.is_empty()
    }
}
