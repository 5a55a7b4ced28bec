//! Task lifecycle and the system calls built on it.
//!
//! All mutable kernel state sits behind one lock that is only ever taken
//! with interrupts masked and never held across a transfer of control.
//! Transfers (entering user mode, exiting to a parent, switching tasks)
//! happen after the lock is dropped, using continuation pointers taken
//! while it was held. Those pointers stay valid because the kernel is never
//! moved and a slot is only reused after its task is gone.

pub mod abi;

#[cfg(test)]
mod tests;

use crate::config::{
    ENTRY_POINT_OFFSET, EXECUTABLE_MAGIC, LARGE_PAGE_SIZE, MAX_FILES, NAME_CAPACITY,
    PROGRAM_IMAGE_VIRT, PROGRAM_LOAD_OFFSET, SHELL, USER_STACK_TOP, VIDEO_MEMORY, VIDMAP_VIRT,
};
use crate::config::{BOOT_CLOCK_HZ, CLOCK_NAME};
use crate::device::clock::{self, VirtualClock};
use crate::device::{Backend, DeviceContext, OpenFile};
use crate::fs::{FileKind, FileStore};
use crate::interrupts::Interrupt;
use crate::paging::{AddressSpaces, Privilege};
use crate::sched::Scheduler;
use crate::task::{Args, Command, TaskId, TaskState, TaskTable};
use crate::terminal::{KeyDecoder, TerminalId, Terminals};
use core::slice;
use log::{debug, error, info, warn};
use spin::{Mutex, Once};
use trine_common::SysError;
use trine_hal::Platform;

/// Everything the kernel mutates.
pub struct KernelState<C> {
    /// Task pool and the current task.
    pub tasks: TaskTable<C>,
    /// Page tables of every slot.
    pub spaces: AddressSpaces,
    /// Ready queue.
    pub scheduler: Scheduler,
    /// Virtual terminals.
    pub terminals: Terminals,
    /// Per-task clock ticks.
    pub clock: VirtualClock,
    /// Keyboard decoder.
    pub keyboard: KeyDecoder,
}

impl<C: Default> KernelState<C> {
    /// State before boot.
    pub const fn new() -> Self {
        KernelState {
            tasks: TaskTable::new(),
            spaces: AddressSpaces::new(),
            scheduler: Scheduler::new(),
            terminals: Terminals::new(),
            clock: VirtualClock::new(),
            keyboard: KeyDecoder::new(),
        }
    }
}

impl<C: Default> Default for KernelState<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// How a task being launched relates to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Spawn {
    /// The caller waits in `execute` for the task to exit.
    Child,
    /// The task is the top-level shell of a freshly started terminal.
    Terminal(TerminalId),
}

/// A loaded task ready to enter user mode.
struct Launch<C> {
    entry: u64,
    exit: *mut C,
}

/// Where a halting task goes.
enum Departure<C> {
    /// Back into the parent's `execute`.
    Parent(*const C),
    /// To the next ready task, never to return.
    Resume(*const C),
    /// Nowhere to go.
    Idle,
}

/// The kernel: a platform plus all state driven through it.
pub struct Kernel<P: Platform> {
    platform: P,
    state: Mutex<KernelState<P::Continuation>>,
    store: Once<&'static dyn FileStore>,
}

impl<P: Platform> Kernel<P> {
    /// Creates a kernel that has not booted yet.
    pub const fn new(platform: P) -> Self {
        Kernel {
            platform,
            state: Mutex::new(KernelState::new()),
            store: Once::new(),
        }
    }

    /// The platform the kernel runs on.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Runs `f` on the kernel state with interrupts masked.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut KernelState<P::Continuation>) -> R) -> R {
        self.platform.without_interrupts(|| f(&mut self.state.lock()))
    }

    /// Installs the file store programs are loaded from.
    pub fn mount(&self, store: &'static dyn FileStore) {
        self.store.call_once(|| store);
    }

    fn mounted(&self) -> Result<&'static dyn FileStore, SysError> {
        self.store.get().copied().ok_or(SysError::NotFound)
    }

    /// Takes over as the bootstrap context.
    ///
    /// Occupies slot 0, loads its address space, clears terminal 0 and
    /// unmasks the timer, keyboard and clock lines.
    pub fn boot(&self) {
        self.with_state(|state| {
            state.tasks.install_bootstrap();
            state.tasks.activate(TaskId::KERNEL, &self.platform);
            if let Err(err) = state.spaces.rebuild(TaskId::KERNEL.index()) {
                error!("bootstrap address space: {:?}", err);
            }
            state.spaces.reload(TaskId::KERNEL.index(), &self.platform);
            state.terminals.clear(&self.platform, TerminalId::FIRST);
        });
        if let Ok(rate) = clock::rate_for(BOOT_CLOCK_HZ) {
            self.platform.set_rate(rate);
        }
        for line in Interrupt::LINES {
            self.platform.enable_irq(line);
        }
        info!("kernel booted");
    }

    /// Runs `command` as a child of the current task.
    ///
    /// Returns the child's exit status once it halts. A top-level program
    /// (one whose parent is the bootstrap context) is restarted instead of
    /// returning, so the bootstrap's own call never returns.
    pub fn execute(&self, command: &[u8]) -> Result<i32, SysError> {
        let launch = self.with_state(|state| self.launch(state, command, Spawn::Child))?;
        let mut entry = launch.entry;
        let status = loop {
            self.platform.disable_interrupts();
            // SAFETY: `launch` mapped and loaded the image and `exit` points
            // into an occupied slot of the pinned task table.
            let status = unsafe { self.platform.enter_user(entry, USER_STACK_TOP, launch.exit) };
            let restart = self.with_state(|state| {
                let tcb = state.tasks.current_tcb().ok()?;
                (tcb.parent == TaskId::KERNEL).then_some(tcb.entry)
            });
            match restart {
                Some(again) => {
                    debug!("top-level program exited with {}, restarting", status);
                    entry = again;
                }
                None => break status,
            }
        };
        self.with_state(|state| self.reap(state));
        Ok(status)
    }

    /// Starts a shell on terminal `terminal`; never returns.
    ///
    /// The caller's task is already queued. If the shell cannot start, the
    /// display goes back to `previous` and the next ready task runs instead.
    fn execute_terminal(&self, terminal: TerminalId, previous: TerminalId) -> ! {
        match self.with_state(|state| self.launch(state, SHELL, Spawn::Terminal(terminal))) {
            Ok(launch) => {
                self.platform.disable_interrupts();
                // SAFETY: as in `execute`; `exit` is the task's own slot and is
                // never resumed.
                let status = unsafe {
                    self.platform
                        .enter_user(launch.entry, USER_STACK_TOP, launch.exit)
                };
                error!("terminal {} shell returned {}", terminal.index(), status);
                self.idle()
            }
            Err(err) => {
                error!("cannot start a shell on terminal {}: {}", terminal.index(), err);
                self.with_state(|state| {
                    state.terminals.set_started(terminal, false);
                    if state.terminals.active() == terminal {
                        self.show_terminal(state, previous);
                    }
                });
                self.resume_next()
            }
        }
    }

    /// Allocates a slot, builds its address space and loads the program.
    ///
    /// On failure every change is undone and the caller stays current.
    fn launch(
        &self,
        state: &mut KernelState<P::Continuation>,
        command: &[u8],
        spawn: Spawn,
    ) -> Result<Launch<P::Continuation>, SysError> {
        // Copy out of user memory before another address space is loaded.
        let command = Command::parse(command);
        let mut name = [0u8; NAME_CAPACITY];
        name[..command.name.len()].copy_from_slice(command.name);
        let name = &name[..command.name.len()];
        let args = Args::new(command.args);

        let caller = state.tasks.current();
        let (parent, terminal) = match spawn {
            Spawn::Child => (caller, state.tasks.current_tcb()?.terminal),
            Spawn::Terminal(terminal) => (TaskId::KERNEL, terminal),
        };
        let id = state.tasks.allocate(parent, terminal)?;

        let entry = match self.load(state, id, name) {
            Ok(entry) => entry,
            Err(err) => {
                state.tasks.release(id);
                state.tasks.activate(caller, &self.platform);
                state.spaces.reload(caller.index(), &self.platform);
                warn!("execute {} failed: {}", core::str::from_utf8(name).unwrap_or("?"), err);
                return Err(err);
            }
        };

        let tcb = state.tasks.lookup_mut(id).ok_or(SysError::Fault)?;
        tcb.args = args;
        tcb.entry = entry;
        tcb.files.bind_terminal();
        tcb.state = TaskState::Running;
        let exit = match spawn {
            Spawn::Child => {
                let caller = state.tasks.lookup_mut(caller).ok_or(SysError::Fault)?;
                caller.state = TaskState::Waiting;
                &mut caller.exit as *mut P::Continuation
            }
            Spawn::Terminal(_) => &mut tcb.exit as *mut P::Continuation,
        };
        debug!(
            "task {} started on terminal {} (parent {})",
            id.index(),
            terminal.index(),
            parent.index()
        );
        Ok(Launch { entry, exit })
    }

    /// Makes `id` current in a fresh address space and copies its image in.
    fn load(
        &self,
        state: &mut KernelState<P::Continuation>,
        id: TaskId,
        name: &[u8],
    ) -> Result<u64, SysError> {
        let store = self.mounted()?;
        let dentry = store.resolve(name)?;
        if dentry.kind != FileKind::Regular {
            return Err(SysError::NotFound);
        }

        state.tasks.activate(id, &self.platform);
        state.spaces.rebuild(id.index())?;
        state.spaces.reload(id.index(), &self.platform);

        let len = (LARGE_PAGE_SIZE - PROGRAM_LOAD_OFFSET) as usize;
        // SAFETY: the image of `id` was just mapped and loaded.
        let image = unsafe {
            slice::from_raw_parts_mut(self.platform.user(PROGRAM_IMAGE_VIRT + PROGRAM_LOAD_OFFSET), len)
        };
        let mut magic = [0u8; 4];
        if store.read(dentry.inode, 0, &mut magic)? < magic.len() || magic != EXECUTABLE_MAGIC {
            return Err(SysError::InvalidFormat);
        }
        let loaded = store.read(dentry.inode, 0, image)?;
        let entry = image
            .get(ENTRY_POINT_OFFSET..ENTRY_POINT_OFFSET + 8)
            .filter(|_| loaded >= ENTRY_POINT_OFFSET + 8)
            .and_then(|bytes| bytes.try_into().ok())
            .map(u64::from_le_bytes)
            .ok_or(SysError::InvalidFormat)?;
        Ok(entry)
    }

    /// Frees the current task after it exited to its parent.
    fn reap(&self, state: &mut KernelState<P::Continuation>) {
        let child = state.tasks.current();
        let parent = state
            .tasks
            .lookup(child)
            .map_or(TaskId::KERNEL, |tcb| tcb.parent);
        state.tasks.release(child);
        state.tasks.activate(parent, &self.platform);
        if let Some(tcb) = state.tasks.lookup_mut(parent) {
            tcb.state = TaskState::Running;
        }
        state.spaces.reload(parent.index(), &self.platform);
        debug!("task {} reaped, back in task {}", child.index(), parent.index());
    }

    /// Ends the current task with an 8-bit status.
    pub fn halt(&self, status: u8) -> ! {
        self.terminate(i32::from(status))
    }

    /// Ends the current task with `status`.
    ///
    /// A top-level shell whose terminal is not the last one running gives
    /// up its terminal and its slot and hands the CPU to the next ready
    /// task. Every other task returns `status` to its parent's `execute`.
    pub fn terminate(&self, status: i32) -> ! {
        self.platform.disable_interrupts();
        self.close_all();
        match self.with_state(|state| self.depart(state)) {
            // SAFETY: the parent is suspended in `execute`, which filled it.
            Departure::Parent(exit) => unsafe { self.platform.exit_user(exit, status) },
            // SAFETY: a queued task's continuation was saved when it queued.
            Departure::Resume(next) => unsafe { self.platform.resume(next) },
            Departure::Idle => {
                error!("nothing to return to from task exit; idling");
                self.idle()
            }
        }
    }

    fn close_all(&self) {
        let mut open = [None; MAX_FILES];
        self.with_state(|state| {
            if let Ok(tcb) = state.tasks.current_tcb_mut() {
                for (slot, file) in open.iter_mut().zip(tcb.files.drain()) {
                    *slot = Some(file);
                }
            }
        });
        for file in open.into_iter().flatten() {
            if let Err(err) = file.close(self) {
                warn!("close on exit failed: {}", err);
            }
        }
    }

    fn depart(&self, state: &mut KernelState<P::Continuation>) -> Departure<P::Continuation> {
        let current = state.tasks.current();
        if current == TaskId::KERNEL {
            return Departure::Idle;
        }
        let Ok(tcb) = state.tasks.current_tcb() else {
            return Departure::Idle;
        };
        let (parent, terminal) = (tcb.parent, tcb.terminal);

        if parent == TaskId::KERNEL {
            if let Some(other) = state.terminals.other_started(terminal) {
                state.terminals.set_started(terminal, false);
                if state.terminals.active() == terminal {
                    self.show_terminal(state, other);
                }
                state.scheduler.remove(current);
                state.tasks.release(current);
                debug!("terminal {} closed with task {}", terminal.index(), current.index());
                let Some(next) = state.scheduler.take_next(&mut state.tasks) else {
                    return Departure::Idle;
                };
                state.tasks.activate(next, &self.platform);
                return match state.tasks.lookup(next) {
                    Some(tcb) => Departure::Resume(&tcb.sched),
                    None => Departure::Idle,
                };
            }
        }
        match state.tasks.lookup(parent) {
            Some(tcb) => Departure::Parent(&tcb.exit),
            None => Departure::Idle,
        }
    }

    /// Picks the next ready task and continues it, dropping the caller.
    fn resume_next(&self) -> ! {
        self.platform.disable_interrupts();
        let next = self.with_state(|state| {
            let next = state.scheduler.take_next(&mut state.tasks)?;
            state.tasks.activate(next, &self.platform);
            state.tasks.lookup(next).map(|tcb| &tcb.sched as *const P::Continuation)
        });
        match next {
            // SAFETY: queued tasks saved their continuation when queueing.
            Some(next) => unsafe { self.platform.resume(next) },
            None => {
                error!("no ready task to resume; idling");
                self.idle()
            }
        }
    }

    /// Waits for interrupts forever.
    pub fn idle(&self) -> ! {
        loop {
            self.platform.wait_for_interrupt();
        }
    }

    /// Re-establishes `id` as the running task after control came back.
    fn resume_current(&self, id: TaskId) {
        self.with_state(|state| {
            state.tasks.activate(id, &self.platform);
            if let Some(tcb) = state.tasks.lookup_mut(id) {
                tcb.state = TaskState::Running;
            }
            state.spaces.reload(id.index(), &self.platform);
        });
    }

    /// Round-robin preemption, called on every timer interrupt.
    pub fn on_timer_tick(&self) {
        let switch = self.with_state(|state| {
            let current = state.tasks.current();
            let next = state.scheduler.preempt(&mut state.tasks)?;
            state.tasks.activate(next, &self.platform);
            let target = state.tasks.lookup(next)?;
            let target = &target.sched as *const P::Continuation;
            let save = &mut state.tasks.lookup_mut(current)?.sched as *mut P::Continuation;
            Some((current, save, target))
        });
        let Some((current, save, target)) = switch else {
            return;
        };
        self.platform.without_interrupts(|| {
            // SAFETY: both continuations live in occupied slots; the target
            // was saved when its task was queued.
            unsafe { self.platform.switch(save, target) }
        });
        self.resume_current(current);
    }

    /// Shows `to`, remapping both terminals' `vidmap` pages.
    fn show_terminal(&self, state: &mut KernelState<P::Continuation>, to: TerminalId) {
        let from = state.terminals.switch_display(&self.platform, to);
        state
            .spaces
            .remap(from.index(), state.terminals.page(from), VIDMAP_VIRT);
        state.spaces.remap(to.index(), VIDEO_MEMORY, VIDMAP_VIRT);
        self.platform.flush_tlb();
        info!("terminal {} -> {}", from.index(), to.index());
    }

    /// Puts terminal `target` on screen, starting a shell there on first use.
    ///
    /// Starting a shell queues the current task and runs the new shell in
    /// its place; this call returns when the current task is scheduled
    /// again.
    pub fn switch_terminal(&self, target: TerminalId) {
        let spawn = self.with_state(|state| {
            let active = state.terminals.active();
            if active == target {
                return None;
            }
            let started = state.terminals.is_started(target);
            if !started && state.tasks.is_full() {
                state
                    .terminals
                    .write(&self.platform, active, b"\nno free task slot for another terminal\n");
                warn!("terminal {} refused: task pool full", target.index());
                return None;
            }
            self.show_terminal(state, target);
            if started {
                return None;
            }
            state.terminals.clear(&self.platform, target);
            state.terminals.set_started(target, true);
            let current = state.tasks.current();
            state.scheduler.enqueue(&mut state.tasks, current);
            let save = &mut state.tasks.lookup_mut(current)?.sched as *mut P::Continuation;
            Some((current, save, active))
        });
        let Some((current, save, previous)) = spawn else {
            return;
        };
        let enabled = self.platform.interrupts_enabled();
        self.platform.disable_interrupts();
        // SAFETY: `save` belongs to the queued current task and is resumed
        // only by the scheduler.
        unsafe {
            self.platform
                .spawn(save, &|| self.execute_terminal(target, previous))
        };
        self.resume_current(current);
        if enabled {
            self.platform.enable_interrupts();
        }
    }

    /// Opens `name`; returns the descriptor.
    pub fn open(&self, name: &[u8]) -> Result<usize, SysError> {
        let backend = if name.starts_with(CLOCK_NAME) {
            Backend::Clock
        } else {
            let dentry = self.mounted()?.resolve(name)?;
            match dentry.kind {
                FileKind::Clock => Backend::Clock,
                FileKind::Directory => Backend::Directory,
                FileKind::Regular => Backend::File {
                    inode: dentry.inode,
                },
            }
        };
        let fd = self.with_state(|state| state.tasks.current_tcb()?.files.free_slot())?;
        let file = OpenFile::open(backend, self)?;
        self.with_state(|state| {
            state.tasks.current_tcb_mut()?.files.install(fd, file);
            Ok(fd)
        })
    }

    /// Closes general-purpose descriptor `fd`.
    pub fn close(&self, fd: usize) -> Result<(), SysError> {
        let file = self.with_state(|state| state.tasks.current_tcb_mut()?.files.take(fd))?;
        if let Err(err) = file.close(self) {
            self.with_state(|state| {
                if let Ok(tcb) = state.tasks.current_tcb_mut() {
                    tcb.files.restore(fd, file);
                }
            });
            return Err(err);
        }
        Ok(())
    }

    /// Reads from `fd` into `buf`.
    pub fn read(&self, fd: usize, buf: &mut [u8]) -> Result<usize, SysError> {
        let mut file = self.with_state(|state| state.tasks.current_tcb()?.files.get(fd))?;
        let read = file.read(self, buf)?;
        self.save_position(fd, &file);
        Ok(read)
    }

    /// Writes `bytes` to `fd`.
    pub fn write(&self, fd: usize, bytes: &[u8]) -> Result<usize, SysError> {
        let mut file = self.with_state(|state| state.tasks.current_tcb()?.files.get(fd))?;
        let written = file.write(self, bytes)?;
        self.save_position(fd, &file);
        Ok(written)
    }

    fn save_position(&self, fd: usize, file: &OpenFile) {
        self.with_state(|state| {
            if let Ok(tcb) = state.tasks.current_tcb_mut() {
                tcb.files.set_position(fd, file.position);
            }
        });
    }

    /// Copies the current task's argument tail into `buf`.
    pub fn getargs(&self, buf: &mut [u8]) -> Result<(), SysError> {
        self.with_state(|state| state.tasks.current_tcb()?.args.copy_to(buf))
    }

    /// Maps the caller's terminal screen into its address space.
    ///
    /// `screen_start` is where the caller wants the address stored; it must
    /// already be user accessible. Returns the mapped address.
    pub fn vidmap(&self, screen_start: u64) -> Result<u64, SysError> {
        self.with_state(|state| {
            let current = state.tasks.current();
            if state.spaces.permission_of(current.index(), screen_start) != Some(Privilege::User) {
                return Err(SysError::PermissionDenied);
            }
            let terminal = state.tasks.current_tcb()?.terminal;
            let page = state.terminals.page(terminal);
            state
                .spaces
                .map_small_page(current.index(), terminal.index(), page, VIDMAP_VIRT)?;
            self.platform.flush_tlb();
            Ok(VIDMAP_VIRT)
        })
    }

    /// Feeds a keyboard scancode to the active terminal.
    pub fn on_scancode(&self, scancode: u8) {
        let switch = self.with_state(|state| {
            let key = state.keyboard.feed(scancode)?;
            state.terminals.handle_key(&self.platform, key)
        });
        if let Some(target) = switch {
            self.switch_terminal(target);
        }
    }

    /// Handles a periodic clock interrupt.
    pub fn on_clock_tick(&self) {
        self.platform.acknowledge_tick();
        self.with_state(|state| state.clock.tick());
    }

    fn current_terminal(&self, state: &KernelState<P::Continuation>) -> TerminalId {
        state
            .tasks
            .current_tcb()
            .map_or(TerminalId::FIRST, |tcb| tcb.terminal)
    }
}

impl<P: Platform> DeviceContext for Kernel<P> {
    fn read_line(&self, buf: &mut [u8]) -> usize {
        let terminal = self.with_state(|state| {
            let terminal = self.current_terminal(state);
            state.terminals.begin_read(terminal);
            terminal
        });
        loop {
            if let Some(read) = self.with_state(|state| state.terminals.take_line(terminal, buf)) {
                return read;
            }
            self.platform.wait_for_interrupt();
        }
    }

    fn write_terminal(&self, bytes: &[u8]) {
        self.with_state(|state| {
            let terminal = self.current_terminal(state);
            state.terminals.write(&self.platform, terminal, bytes);
        });
    }

    fn store(&self) -> Result<&dyn FileStore, SysError> {
        self.mounted()
    }

    fn open_clock(&self) {
        self.with_state(|state| state.clock.open(state.tasks.current()));
    }

    fn close_clock(&self) {
        self.with_state(|state| state.clock.close(state.tasks.current()));
    }

    fn wait_for_tick(&self) {
        let current = self.with_state(|state| state.tasks.current());
        while !self.with_state(|state| state.clock.take_tick(current)) {
            self.platform.wait_for_interrupt();
        }
    }

    fn set_clock_rate(&self, rate: u8) {
        self.platform.set_rate(rate);
    }
}
