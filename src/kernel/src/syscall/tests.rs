use super::Kernel;
use crate::config::{
    terminal_backing, KERNEL_WINDOW_BASE, PROGRAM_IMAGE_VIRT, VIDEO_MEMORY, VIDMAP_VIRT,
};
use crate::device::clock;
use crate::interrupts::Interrupt;
use crate::paging::Privilege;
use crate::task::{TaskId, TaskState};
use crate::terminal::TerminalId;
use crate::testutil::{self, done, MockPlatform, Outcome};
use trine_common::{SysError, Syscall};
use trine_hal::Memory;

type K = &'static Kernel<MockPlatform>;

const ALT_DOWN: u8 = 0x38;
const F2_DOWN: u8 = 0x3C;
const A_DOWN: u8 = 0x1E;
const A_UP: u8 = 0x9E;
const ENTER_DOWN: u8 = 0x1C;

fn task(index: usize) -> TaskId {
    TaskId::new(index).unwrap()
}

fn terminal(index: usize) -> TerminalId {
    TerminalId::new(index).unwrap()
}

fn terminal_of(kernel: K) -> TerminalId {
    kernel.with_state(|state| state.tasks.current_tcb().unwrap().terminal)
}

fn status(kernel: K, result: Result<i32, SysError>) {
    kernel.platform().note(&format!("{result:?}"));
}

fn exit_seven(kernel: K) {
    kernel.halt(7)
}

/// Every occupied slot is running, queued or waiting, and only the
/// current task runs.
fn assert_scheduling_consistent(kernel: K) {
    kernel.with_state(|state| {
        let current = state.tasks.current();
        assert!(!state.scheduler.is_ready(current), "{current:?} runs while queued");
        for id in state.tasks.occupied() {
            let expected = if id == current {
                TaskState::Running
            } else if state.scheduler.is_ready(id) {
                TaskState::Ready
            } else {
                TaskState::Waiting
            };
            assert_eq!(state.tasks.lookup(id).unwrap().state, expected, "{id:?}");
        }
    });
}

/// The current task's tables are loaded and the TLB was flushed since
/// `flushes` was sampled.
fn assert_reloaded(kernel: K, flushes: usize) {
    let (current, root) = kernel.with_state(|state| {
        let current = state.tasks.current();
        (current, state.spaces.root(current.index()))
    });
    assert_eq!(kernel.platform().root(), root, "stale root for {current:?}");
    assert!(kernel.platform().flushes() > flushes, "no flush for {current:?}");
}

fn run_shell(programs: &[(&'static str, testutil::Program)]) -> (Outcome, K) {
    let (tx, rx) = std::sync::mpsc::channel();
    let outcome = testutil::run(programs, move |kernel| {
        tx.send(kernel).unwrap();
        let _ = kernel.execute(b"shell");
    });
    (outcome, rx.recv().unwrap())
}

#[test]
fn execute_returns_the_child_status() {
    fn child(kernel: K) {
        assert_scheduling_consistent(kernel);
        kernel.with_state(|state| {
            assert_eq!(state.tasks.lookup(task(1)).unwrap().state, TaskState::Waiting);
        });
        kernel.halt(7)
    }
    fn shell(kernel: K) {
        assert_scheduling_consistent(kernel);
        let flushes = kernel.platform().flushes();
        let result = kernel.execute(b"child");
        status(kernel, result);
        kernel.with_state(|state| {
            assert_eq!(state.tasks.current(), task(1));
            assert!(state.tasks.lookup(task(2)).is_none());
        });
        assert_reloaded(kernel, flushes);
        assert_scheduling_consistent(kernel);
        done()
    }
    let (outcome, kernel) = run_shell(&[("shell", shell), ("child", child)]);
    assert_eq!(outcome, Outcome::Done);
    assert_eq!(kernel.platform().notes(), vec!["Ok(7)"]);
}

#[test]
fn failed_execute_leaves_the_caller_running() {
    fn shell(kernel: K) {
        let root = kernel.platform().root();
        assert_eq!(kernel.execute(b"missing"), Err(SysError::NotFound));
        assert_eq!(kernel.execute(b"."), Err(SysError::NotFound));
        assert_eq!(kernel.execute(b"notes.txt"), Err(SysError::InvalidFormat));
        assert_eq!(kernel.platform().root(), root);
        kernel.with_state(|state| {
            assert_eq!(state.tasks.current(), task(1));
            assert_eq!(state.tasks.occupied().collect::<Vec<_>>(), vec![task(0), task(1)]);
        });
        assert_eq!(kernel.platform().kernel_stack(), crate::config::kernel_stack_top(1));
        done()
    }
    let (outcome, _) = run_shell(&[("shell", shell)]);
    assert_eq!(outcome, Outcome::Done);
}

#[test]
fn bootstrap_execute_of_a_missing_shell_fails() {
    let outcome = testutil::run(&[], |kernel| {
        assert_eq!(kernel.execute(b"shell"), Err(SysError::NotFound));
        kernel.with_state(|state| assert_eq!(state.tasks.current(), TaskId::KERNEL));
    });
    assert_eq!(outcome, Outcome::Finished);
}

#[test]
fn arguments_reach_the_child() {
    fn child(kernel: K) {
        let mut buf = [0xFFu8; 16];
        kernel.getargs(&mut buf).unwrap();
        assert_eq!(&buf[..10], b"arg1 arg2\0");
        let mut short = [0u8; 4];
        assert_eq!(kernel.getargs(&mut short), Err(SysError::InvalidArgument));
        kernel.halt(0)
    }
    fn shell(kernel: K) {
        assert_eq!(kernel.execute(b"child   arg1 arg2"), Ok(0));
        let mut buf = [0u8; 16];
        assert_eq!(kernel.getargs(&mut buf), Err(SysError::InvalidArgument));
        done()
    }
    let (outcome, _) = run_shell(&[("shell", shell), ("child", child)]);
    assert_eq!(outcome, Outcome::Done);
}

#[test]
fn commands_are_read_from_user_memory() {
    fn shell(kernel: K) {
        let command = PROGRAM_IMAGE_VIRT + 0x100;
        unsafe {
            let bytes = b"child\0";
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), kernel.platform().user(command), bytes.len());
        }
        assert_eq!(kernel.syscall(Syscall::Execute as u64, command, 0, 0), 7);
        done()
    }
    let (outcome, _) = run_shell(&[("shell", shell), ("child", exit_seven)]);
    assert_eq!(outcome, Outcome::Done);
}

#[test]
fn the_task_pool_runs_out() {
    fn nest(kernel: K) {
        let depth = kernel.platform().note("nest");
        let result = kernel.execute(b"nest");
        if depth == 6 {
            assert_eq!(result, Err(SysError::ResourceExhausted));
            kernel.with_state(|state| assert!(state.tasks.is_full()));
            done()
        }
        unreachable!("only the deepest task returns");
    }
    let outcome = testutil::run(&[("nest", nest)], |kernel| {
        let _ = kernel.execute(b"nest");
    });
    assert_eq!(outcome, Outcome::Done);
}

#[test]
fn a_full_pool_refuses_a_new_terminal() {
    fn nest(kernel: K) {
        if kernel.platform().note("nest") < 6 {
            let _ = kernel.execute(b"nest");
        }
        kernel.switch_terminal(terminal(1));
        kernel.with_state(|state| {
            assert_eq!(state.terminals.active(), TerminalId::FIRST);
            assert!(!state.terminals.is_started(terminal(1)));
            assert!(state.scheduler.is_idle());
        });
        assert_eq!(kernel.platform().screen_row(VIDEO_MEMORY, 1, 7), b"no free");
        done()
    }
    let outcome = testutil::run(&[("nest", nest)], |kernel| {
        let _ = kernel.execute(b"nest");
    });
    assert_eq!(outcome, Outcome::Done);
}

#[test]
fn exceptions_kill_the_task_with_the_fault_status() {
    fn child(kernel: K) {
        kernel.handle_exception(14)
    }
    fn shell(kernel: K) {
        let result = kernel.execute(b"child");
        status(kernel, result);
        done()
    }
    let (outcome, kernel) = run_shell(&[("shell", shell), ("child", child)]);
    assert_eq!(outcome, Outcome::Done);
    assert_eq!(kernel.platform().notes(), vec!["Ok(256)"]);
}

#[test]
fn top_level_programs_restart_when_they_halt() {
    fn shell(kernel: K) {
        if kernel.platform().note("run") == 3 {
            kernel.with_state(|state| {
                assert_eq!(state.tasks.current(), task(1));
                assert_eq!(state.tasks.occupied().count(), 2);
            });
            done()
        }
        kernel.halt(1)
    }
    let (outcome, kernel) = run_shell(&[("shell", shell)]);
    assert_eq!(outcome, Outcome::Done);
    assert_eq!(kernel.platform().notes().len(), 3);
}

#[test]
fn halting_the_bootstrap_context_idles() {
    let outcome = testutil::run(&[], |kernel| kernel.halt(0));
    assert_eq!(outcome, Outcome::Stalled);
}

#[test]
fn descriptors_run_out_after_six_opens() {
    fn shell(kernel: K) {
        for fd in 2..8 {
            assert_eq!(kernel.open(b"frame0.txt"), Ok(fd));
        }
        assert_eq!(kernel.open(b"frame0.txt"), Err(SysError::ResourceExhausted));
        assert_eq!(kernel.close(3), Ok(()));
        assert_eq!(kernel.open(b"."), Ok(3));
        done()
    }
    let (outcome, _) = run_shell(&[("shell", shell)]);
    assert_eq!(outcome, Outcome::Done);
}

#[test]
fn closing_reserved_or_unopened_descriptors_fails() {
    fn shell(kernel: K) {
        for fd in [0, 1, 5, 8, 99] {
            assert_eq!(kernel.close(fd), Err(SysError::InvalidDescriptor));
        }
        assert_eq!(kernel.open(b"missing"), Err(SysError::NotFound));
        assert_eq!(kernel.read(6, &mut [0; 4]), Err(SysError::InvalidDescriptor));
        done()
    }
    let (outcome, _) = run_shell(&[("shell", shell)]);
    assert_eq!(outcome, Outcome::Done);
}

#[test]
fn files_read_sequentially_and_refuse_writes() {
    fn shell(kernel: K) {
        let fd = kernel.open(b"frame0.txt").unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(kernel.read(fd, &mut buf), Ok(3));
        assert_eq!(&buf, b"fis");
        assert_eq!(kernel.read(fd, &mut buf), Ok(1));
        assert_eq!(buf[0], b'h');
        assert_eq!(kernel.read(fd, &mut buf), Ok(0));
        assert_eq!(kernel.write(fd, b"x"), Err(SysError::Unsupported));
        assert_eq!(kernel.read(1, &mut buf), Err(SysError::Unsupported));
        assert_eq!(kernel.write(0, b"x"), Err(SysError::Unsupported));
        done()
    }
    let (outcome, _) = run_shell(&[("shell", shell)]);
    assert_eq!(outcome, Outcome::Done);
}

#[test]
fn the_directory_lists_one_name_per_read() {
    fn shell(kernel: K) {
        let fd = kernel.open(b".").unwrap();
        let mut names = Vec::new();
        let mut buf = [0u8; 32];
        loop {
            let read = kernel.read(fd, &mut buf).unwrap();
            if read == 0 {
                break;
            }
            names.push(String::from_utf8(buf[..read].to_vec()).unwrap());
        }
        assert_eq!(names, [".", "rtc", "frame0.txt", "notes.txt", "shell"]);
        done()
    }
    let (outcome, _) = run_shell(&[("shell", shell)]);
    assert_eq!(outcome, Outcome::Done);
}

#[test]
fn writes_land_on_the_task_terminal() {
    fn shell(kernel: K) {
        assert_eq!(kernel.write(1, b"hello"), Ok(5));
        assert_eq!(kernel.platform().screen_row(VIDEO_MEMORY, 0, 5), b"hello");
        assert_eq!(kernel.platform().cursor(), (5, 0));
        done()
    }
    let (outcome, _) = run_shell(&[("shell", shell)]);
    assert_eq!(outcome, Outcome::Done);
}

#[test]
fn terminal_reads_wait_for_a_full_line() {
    fn shell(kernel: K) {
        let platform = kernel.platform();
        for scancode in [A_DOWN, A_UP, ENTER_DOWN] {
            platform.push_event(move |kernel| {
                kernel.handle_interrupt(Interrupt::Keyboard(scancode))
            });
        }
        let mut buf = [0u8; 8];
        assert_eq!(kernel.read(0, &mut buf), Ok(2));
        assert_eq!(&buf[..2], b"a\n");
        assert_eq!(platform.screen_row(VIDEO_MEMORY, 0, 1), b"a");
        assert_eq!(platform.cursor(), (0, 1));
        done()
    }
    let (outcome, _) = run_shell(&[("shell", shell)]);
    assert_eq!(outcome, Outcome::Done);
}

#[test]
fn keys_typed_before_a_read_are_not_buffered() {
    fn shell(kernel: K) {
        kernel.on_scancode(A_DOWN);
        kernel.on_scancode(ENTER_DOWN);
        let mut buf = [0u8; 8];
        let _ = kernel.read(0, &mut buf);
        unreachable!("no line was typed during the read");
    }
    let (outcome, _) = run_shell(&[("shell", shell)]);
    assert_eq!(outcome, Outcome::Stalled);
}

#[test]
fn the_clock_waits_for_a_tick_and_takes_rates() {
    fn shell(kernel: K) {
        let fd = kernel.open(b"rtc").unwrap();
        assert_eq!(kernel.platform().rate(), clock::rate_for(2).ok());
        assert_eq!(kernel.write(fd, &1024u32.to_le_bytes()), Ok(0));
        assert_eq!(kernel.platform().rate(), clock::rate_for(1024).ok());
        assert_eq!(kernel.write(fd, &3u32.to_le_bytes()), Ok(0));
        assert_eq!(kernel.write(fd, &1u32.to_le_bytes()), Err(SysError::InvalidArgument));
        assert_eq!(kernel.write(fd, &[4, 0]), Err(SysError::InvalidArgument));

        // A tick that lands before the read satisfies it at once.
        kernel.handle_interrupt(Interrupt::Rtc);
        assert_eq!(kernel.read(fd, &mut []), Ok(0));
        kernel
            .platform()
            .push_event(|kernel| kernel.handle_interrupt(Interrupt::Rtc));
        assert_eq!(kernel.read(fd, &mut []), Ok(0));
        assert_eq!(kernel.platform().clock_acks(), 2);
        done()
    }
    let (outcome, _) = run_shell(&[("shell", shell)]);
    assert_eq!(outcome, Outcome::Done);
}

#[test]
fn clock_names_need_no_directory_entry() {
    fn shell(kernel: K) {
        assert_eq!(kernel.open(b"rtc0"), Ok(2));
        kernel.with_state(|state| assert!(state.clock.is_open(task(1))));
        assert_eq!(kernel.close(2), Ok(()));
        kernel.with_state(|state| assert!(!state.clock.is_open(task(1))));
        done()
    }
    let (outcome, _) = run_shell(&[("shell", shell)]);
    assert_eq!(outcome, Outcome::Done);
}

#[test]
fn halting_closes_open_descriptors() {
    fn child(kernel: K) {
        kernel.open(b"rtc").unwrap();
        kernel.open(b"frame0.txt").unwrap();
        kernel.halt(3)
    }
    fn shell(kernel: K) {
        assert_eq!(kernel.execute(b"child"), Ok(3));
        kernel.with_state(|state| assert!(!state.clock.is_open(task(2))));
        assert_eq!(kernel.execute(b"child"), Ok(3));
        done()
    }
    let (outcome, _) = run_shell(&[("shell", shell), ("child", child)]);
    assert_eq!(outcome, Outcome::Done);
}

#[test]
fn vidmap_needs_a_user_address() {
    fn shell(kernel: K) {
        let spaces = |kernel: K, virt| kernel.with_state(|state| state.spaces.permission_of(1, virt));
        assert_eq!(kernel.vidmap(KERNEL_WINDOW_BASE), Err(SysError::PermissionDenied));
        assert_eq!(kernel.vidmap(0x1000), Err(SysError::PermissionDenied));
        let denied = i64::from(SysError::PermissionDenied.code());
        let vidmap = Syscall::Vidmap as u64;
        assert_eq!(kernel.syscall(vidmap, KERNEL_WINDOW_BASE, 0, 0), denied);
        assert_eq!(kernel.syscall(vidmap, 0x1000, 0, 0), denied);
        assert_eq!(spaces(kernel, VIDMAP_VIRT), None);

        let out = PROGRAM_IMAGE_VIRT + 0x200;
        assert_eq!(kernel.syscall(Syscall::Vidmap as u64, out, 0, 0), 0);
        let mut address = [0u8; 8];
        unsafe {
            core::ptr::copy_nonoverlapping(kernel.platform().user(out), address.as_mut_ptr(), 8);
        }
        assert_eq!(u64::from_le_bytes(address), VIDMAP_VIRT);
        assert_eq!(spaces(kernel, VIDMAP_VIRT), Some(Privilege::User));
        done()
    }
    let (outcome, _) = run_shell(&[("shell", shell)]);
    assert_eq!(outcome, Outcome::Done);
}

#[test]
fn a_new_terminal_gets_its_own_shell() {
    fn shell(kernel: K) {
        if terminal_of(kernel) == TerminalId::FIRST {
            kernel.write(1, b"one").unwrap();
            let flushes = kernel.platform().flushes();
            kernel.handle_interrupt(Interrupt::Keyboard(ALT_DOWN));
            kernel.handle_interrupt(Interrupt::Keyboard(F2_DOWN));
            assert_reloaded(kernel, flushes);
            assert_scheduling_consistent(kernel);
            kernel.with_state(|state| {
                assert_eq!(state.tasks.current(), task(1));
                assert_eq!(state.terminals.active(), TerminalId::FIRST);
                assert!(!state.terminals.is_started(terminal(1)));
                assert!(state.tasks.lookup(task(2)).is_none());
                assert!(state.scheduler.is_idle());
            });
            assert_eq!(kernel.platform().screen_row(terminal_backing(1), 0, 2), b"hi");
            assert_eq!(kernel.platform().screen_row(VIDEO_MEMORY, 0, 3), b"one");
            done()
        }
        assert_scheduling_consistent(kernel);
        kernel.with_state(|state| {
            let tcb = state.tasks.current_tcb().unwrap();
            assert_eq!((tcb.parent, tcb.terminal), (TaskId::KERNEL, terminal(1)));
            assert_eq!(state.terminals.active(), terminal(1));
            assert!(state.scheduler.is_ready(task(1)));
        });
        kernel.write(1, b"hi").unwrap();
        kernel.halt(0)
    }
    let (outcome, _) = run_shell(&[("shell", shell)]);
    assert_eq!(outcome, Outcome::Done);
}

#[test]
fn timer_ticks_rotate_between_terminals() {
    fn shell(kernel: K) {
        if terminal_of(kernel) == TerminalId::FIRST {
            kernel.switch_terminal(terminal(1));
            unreachable!("the second shell ends the scenario");
        }
        let sched = |kernel: K, id| {
            kernel.with_state(|state| &state.tasks.lookup(id).unwrap().sched as *const _ as usize)
        };
        let (own, other) = (sched(kernel, task(2)), sched(kernel, task(1)));
        kernel.platform().on_switch(|kernel| {
            kernel.with_state(|state| {
                assert_eq!(state.tasks.current(), task(1));
                assert_eq!(state.scheduler.queued().collect::<Vec<_>>(), vec![task(2)]);
            });
            assert_scheduling_consistent(kernel);
            // The first shell's next tick hands the CPU back.
            kernel.with_state(|state| {
                assert_eq!(state.scheduler.preempt(&mut state.tasks), Some(task(2)));
            });
            kernel.platform().note("switched");
        });
        let flushes = kernel.platform().flushes();
        kernel.handle_interrupt(Interrupt::Timer);
        assert_eq!(kernel.platform().switches(), vec![(own, other)]);
        assert_eq!(kernel.platform().notes(), vec!["switched"]);
        kernel.with_state(|state| {
            assert_eq!(state.tasks.current(), task(2));
            assert_eq!(state.scheduler.queued().collect::<Vec<_>>(), vec![task(1)]);
        });
        assert_reloaded(kernel, flushes);
        assert_scheduling_consistent(kernel);
        done()
    }
    let (outcome, _) = run_shell(&[("shell", shell)]);
    assert_eq!(outcome, Outcome::Done);
}

#[test]
fn timer_ticks_without_competition_change_nothing() {
    fn shell(kernel: K) {
        kernel.handle_interrupt(Interrupt::Timer);
        assert!(kernel.platform().switches().is_empty());
        kernel.with_state(|state| assert_eq!(state.tasks.current(), task(1)));
        done()
    }
    let (outcome, _) = run_shell(&[("shell", shell)]);
    assert_eq!(outcome, Outcome::Done);
}

#[test]
fn a_terminal_without_a_shell_gives_the_cpu_back() {
    let outcome = testutil::run(&[], |kernel| {
        kernel.with_state(|state| {
            state
                .terminals
                .write(kernel.platform(), TerminalId::FIRST, b"boot")
        });
        kernel.switch_terminal(terminal(2));
        kernel.with_state(|state| {
            assert_eq!(state.tasks.current(), TaskId::KERNEL);
            assert_eq!(state.terminals.active(), TerminalId::FIRST);
            assert!(!state.terminals.is_started(terminal(2)));
            assert!(state.scheduler.is_idle());
        });
        assert_eq!(kernel.platform().screen_row(VIDEO_MEMORY, 0, 4), b"boot");
        assert_eq!(kernel.platform().cursor(), (4, 0));
    });
    assert_eq!(outcome, Outcome::Finished);
}
