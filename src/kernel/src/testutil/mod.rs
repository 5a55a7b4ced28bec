//! Test infrastructure for the Trine kernel.
//!
//! Provides a recording [`MockPlatform`], boot file-store images and a
//! harness that boots a kernel on the host and runs a scenario in it.
//!
//! User programs are plain functions registered at an entry address. Control
//! transfers the hardware performs by swapping stacks are modelled with
//! unwinding: leaving a context throws a payload naming the continuation it
//! goes to, and the frame that saved that continuation catches it.
//!
//! # Usage
//!
//! ```rust,ignore
//! let outcome = testutil::run(&[("shell", shell)], |kernel| {
//!     kernel.execute(b"shell").ok();
//! });
//! assert_eq!(outcome, Outcome::Done);
//! ```

use crate::config::{
    ENTRY_POINT_OFFSET, EXECUTABLE_MAGIC, LARGE_PAGE_SIZE, PAGE_SIZE, PROGRAM_IMAGE_VIRT,
    PROGRAM_LOAD_OFFSET,
};
use crate::fs::bootfs::{BLOCK_SIZE, DENTRY_SIZE, DENTRY_TABLE_OFFSET};
use crate::fs::BootFs;
use crate::syscall::Kernel;
use crate::terminal::screen::BUFFER_WIDTH;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use trine_hal::{Console, Continuations, Cpu, InterruptController, Memory, Mmu, RealTimeClock};

/// A user program: runs with the kernel as its only syscall surface.
pub type Program = fn(&'static Kernel<MockPlatform>);

/// Something delivered by the next wait for an interrupt.
pub type Event = Box<dyn FnOnce(&'static Kernel<MockPlatform>) + Send>;

/// Where the first registered program's entry point lies.
const PROGRAM_ENTRY_BASE: u64 = PROGRAM_IMAGE_VIRT + PROGRAM_LOAD_OFFSET + 0x1000;

/// Saved execution state; only its address matters.
#[derive(Debug, Default)]
pub struct MockContinuation(u64);

/// Unwinds to the `enter_user` that saved `target`.
struct Exit {
    target: usize,
    status: i32,
}

/// Unwinds to the `spawn` that saved `target`.
struct Resume {
    target: usize,
}

/// Nothing left to deliver to a waiting CPU.
struct Stalled;

/// The scenario reached its end.
struct TestDone;

/// How a scenario ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The scenario returned.
    Finished,
    /// A program called [`done`].
    Done,
    /// The CPU waited with no interrupt left to deliver.
    Stalled,
    /// A resume reached a continuation no frame on the host stack saved.
    Resumed(usize),
    /// An exit reached a continuation no frame on the host stack saved.
    Exited {
        /// Continuation address.
        target: usize,
        /// Exit status.
        status: i32,
    },
}

/// Ends the running scenario with [`Outcome::Done`].
pub fn done() -> ! {
    panic::resume_unwind(Box::new(TestDone))
}

/// Platform that records what the kernel asks of it.
pub struct MockPlatform {
    interrupts: AtomicBool,
    kernel_stack: AtomicU64,
    root: AtomicU64,
    roots: Mutex<Vec<u64>>,
    flushes: AtomicUsize,
    enabled: Mutex<Vec<u8>>,
    acknowledged: Mutex<Vec<u8>>,
    switches: Mutex<Vec<(usize, usize)>>,
    frames: Mutex<HashMap<u64, Box<[u8; PAGE_SIZE as usize]>>>,
    images: Mutex<HashMap<u64, Box<[u8]>>>,
    cursor: Mutex<(usize, usize)>,
    rate: Mutex<Option<u8>>,
    clock_acks: AtomicUsize,
    programs: Mutex<HashMap<u64, Program>>,
    events: Mutex<VecDeque<Event>>,
    on_switch: Mutex<Option<Event>>,
    notes: Mutex<Vec<String>>,
    kernel: spin::Once<&'static Kernel<MockPlatform>>,
}

impl MockPlatform {
    /// A platform with interrupts masked and nothing recorded.
    pub fn new() -> Self {
        MockPlatform {
            interrupts: AtomicBool::new(false),
            kernel_stack: AtomicU64::new(0),
            root: AtomicU64::new(0),
            roots: Mutex::new(Vec::new()),
            flushes: AtomicUsize::new(0),
            enabled: Mutex::new(Vec::new()),
            acknowledged: Mutex::new(Vec::new()),
            switches: Mutex::new(Vec::new()),
            frames: Mutex::new(HashMap::new()),
            images: Mutex::new(HashMap::new()),
            cursor: Mutex::new((0, 0)),
            rate: Mutex::new(None),
            clock_acks: AtomicUsize::new(0),
            programs: Mutex::new(HashMap::new()),
            events: Mutex::new(VecDeque::new()),
            on_switch: Mutex::new(None),
            notes: Mutex::new(Vec::new()),
            kernel: spin::Once::new(),
        }
    }

    fn kernel(&self) -> &'static Kernel<MockPlatform> {
        self.kernel
            .get()
            .copied()
            .expect("platform is not attached to a kernel")
    }

    /// Registers `program` at `entry`.
    pub fn register(&self, entry: u64, program: Program) {
        self.programs.lock().unwrap().insert(entry, program);
    }

    /// Queues an interrupt for the next wait.
    pub fn push_event(&self, event: impl FnOnce(&'static Kernel<MockPlatform>) + Send + 'static) {
        self.events.lock().unwrap().push_back(Box::new(event));
    }

    /// Runs `hook` inside the next context switch.
    pub fn on_switch(&self, hook: impl FnOnce(&'static Kernel<MockPlatform>) + Send + 'static) {
        *self.on_switch.lock().unwrap() = Some(Box::new(hook));
    }

    /// Appends a note; returns how many equal notes exist now.
    pub fn note(&self, note: &str) -> usize {
        let mut notes = self.notes.lock().unwrap();
        notes.push(note.to_string());
        notes.iter().filter(|existing| *existing == note).count()
    }

    /// Notes in order.
    pub fn notes(&self) -> Vec<String> {
        self.notes.lock().unwrap().clone()
    }

    /// IRQ lines acknowledged so far.
    pub fn acknowledged(&self) -> Vec<u8> {
        self.acknowledged.lock().unwrap().clone()
    }

    /// IRQ lines currently unmasked.
    pub fn enabled_irqs(&self) -> Vec<u8> {
        self.enabled.lock().unwrap().clone()
    }

    /// Last programmed clock rate.
    pub fn rate(&self) -> Option<u8> {
        *self.rate.lock().unwrap()
    }

    /// Clock interrupts re-armed.
    pub fn clock_acks(&self) -> usize {
        self.clock_acks.load(Ordering::SeqCst)
    }

    /// Hardware cursor as (column, row).
    pub fn cursor(&self) -> (usize, usize) {
        *self.cursor.lock().unwrap()
    }

    /// Kernel stack installed for the next trap.
    pub fn kernel_stack(&self) -> u64 {
        self.kernel_stack.load(Ordering::SeqCst)
    }

    /// Loaded paging root.
    pub fn root(&self) -> u64 {
        self.root.load(Ordering::SeqCst)
    }

    /// Translation cache flushes.
    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Context switches as (saved, resumed) continuation addresses.
    pub fn switches(&self) -> Vec<(usize, usize)> {
        self.switches.lock().unwrap().clone()
    }

    /// Text on row `row` of the frame at `phys`.
    pub fn screen_row(&self, phys: u64, row: usize, len: usize) -> Vec<u8> {
        let frame = unsafe { self.frame(phys) };
        (0..len)
            .map(|column| unsafe { *frame.add((row * BUFFER_WIDTH + column) * 2) })
            .collect()
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptController for MockPlatform {
    fn enable_irq(&self, irq: u8) {
        let mut enabled = self.enabled.lock().unwrap();
        if !enabled.contains(&irq) {
            enabled.push(irq);
        }
    }

    fn disable_irq(&self, irq: u8) {
        self.enabled.lock().unwrap().retain(|&line| line != irq);
    }

    fn acknowledge(&self, irq: u8) {
        self.acknowledged.lock().unwrap().push(irq);
    }
}

impl Cpu for MockPlatform {
    fn interrupts_enabled(&self) -> bool {
        self.interrupts.load(Ordering::SeqCst)
    }

    fn disable_interrupts(&self) {
        self.interrupts.store(false, Ordering::SeqCst);
    }

    fn enable_interrupts(&self) {
        self.interrupts.store(true, Ordering::SeqCst);
    }

    fn wait_for_interrupt(&self) {
        self.enable_interrupts();
        let event = self.events.lock().unwrap().pop_front();
        match event {
            Some(event) => event(self.kernel()),
            None => panic::resume_unwind(Box::new(Stalled)),
        }
    }

    fn set_kernel_stack(&self, top: u64) {
        self.kernel_stack.store(top, Ordering::SeqCst);
    }
}

impl Mmu for MockPlatform {
    unsafe fn load_root(&self, root: u64) {
        self.root.store(root, Ordering::SeqCst);
        self.roots.lock().unwrap().push(root);
    }

    fn flush_tlb(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Continuations for MockPlatform {
    type Continuation = MockContinuation;

    unsafe fn switch(&self, save: *mut MockContinuation, target: *const MockContinuation) {
        self.switches
            .lock()
            .unwrap()
            .push((save as usize, target as usize));
        let hook = self.on_switch.lock().unwrap().take();
        if let Some(hook) = hook {
            hook(self.kernel());
        }
    }

    unsafe fn resume(&self, target: *const MockContinuation) -> ! {
        panic::resume_unwind(Box::new(Resume {
            target: target as usize,
        }))
    }

    unsafe fn spawn(&self, save: *mut MockContinuation, entry: &dyn Fn()) {
        let payload = match panic::catch_unwind(AssertUnwindSafe(entry)) {
            Ok(()) => panic!("spawned context returned"),
            Err(payload) => payload,
        };
        match payload.downcast::<Resume>() {
            Ok(resume) if resume.target == save as usize => {}
            Ok(resume) => panic::resume_unwind(resume),
            Err(other) => panic::resume_unwind(other),
        }
    }

    unsafe fn enter_user(&self, entry: u64, _stack_top: u64, save: *mut MockContinuation) -> i32 {
        let program = self
            .programs
            .lock()
            .unwrap()
            .get(&entry)
            .copied()
            .unwrap_or_else(|| panic!("no program at {entry:#x}"));
        let kernel = self.kernel();
        self.enable_interrupts();
        let payload = match panic::catch_unwind(AssertUnwindSafe(|| {
            program(kernel);
            kernel.halt(0)
        })) {
            Ok(()) => unreachable!("halt returned"),
            Err(payload) => payload,
        };
        match payload.downcast::<Exit>() {
            Ok(exit) if exit.target == save as usize => exit.status,
            Ok(exit) => panic::resume_unwind(exit),
            Err(other) => panic::resume_unwind(other),
        }
    }

    unsafe fn exit_user(&self, exit: *const MockContinuation, status: i32) -> ! {
        panic::resume_unwind(Box::new(Exit {
            target: exit as usize,
            status,
        }))
    }
}

impl Memory for MockPlatform {
    unsafe fn frame(&self, phys: u64) -> *mut u8 {
        let mut frames = self.frames.lock().unwrap();
        let frame = frames
            .entry(phys)
            .or_insert_with(|| Box::new([0; PAGE_SIZE as usize]));
        frame.as_mut_ptr()
    }

    unsafe fn user(&self, virt: u64) -> *mut u8 {
        let offset = virt
            .checked_sub(PROGRAM_IMAGE_VIRT)
            .filter(|&offset| offset < LARGE_PAGE_SIZE)
            .unwrap_or_else(|| panic!("{virt:#x} is outside the program image"));
        let root = self.root();
        let mut images = self.images.lock().unwrap();
        let image = images
            .entry(root)
            .or_insert_with(|| vec![0; LARGE_PAGE_SIZE as usize].into_boxed_slice());
        image.as_mut_ptr().add(offset as usize)
    }
}

impl Console for MockPlatform {
    fn set_cursor(&self, column: usize, row: usize) {
        *self.cursor.lock().unwrap() = (column, row);
    }
}

impl RealTimeClock for MockPlatform {
    fn set_rate(&self, rate: u8) {
        *self.rate.lock().unwrap() = Some(rate);
    }

    fn acknowledge_tick(&self) {
        self.clock_acks.fetch_add(1, Ordering::SeqCst);
    }
}

/// Builder for boot-block file-store images.
#[derive(Debug, Clone, Default)]
pub struct FsImage {
    entries: Vec<(String, u32, Option<Vec<u8>>)>,
}

impl FsImage {
    /// An empty image.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the directory entry.
    pub fn directory(mut self, name: &str) -> Self {
        self.entries.push((name.to_string(), 1, None));
        self
    }

    /// Adds a clock device entry.
    pub fn clock(mut self, name: &str) -> Self {
        self.entries.push((name.to_string(), 0, None));
        self
    }

    /// Adds a regular file.
    pub fn file(mut self, name: &str, data: &[u8]) -> Self {
        self.entries.push((name.to_string(), 2, Some(data.to_vec())));
        self
    }

    /// Lays the image out.
    pub fn build(&self) -> Vec<u8> {
        let files: Vec<&[u8]> = self
            .entries
            .iter()
            .filter_map(|(_, _, data)| data.as_deref())
            .collect();
        let inodes = files.len();
        let blocks: usize = files.iter().map(|data| data.len().div_ceil(BLOCK_SIZE)).sum();
        let mut image = vec![0u8; (1 + inodes + blocks) * BLOCK_SIZE];

        let mut put = |image: &mut Vec<u8>, offset: usize, value: usize| {
            image[offset..offset + 4].copy_from_slice(&(value as u32).to_le_bytes());
        };
        put(&mut image, 0, self.entries.len());
        put(&mut image, 4, inodes);
        put(&mut image, 8, blocks);

        let mut inode = 0;
        for (index, (name, kind, data)) in self.entries.iter().enumerate() {
            let base = DENTRY_TABLE_OFFSET + index * DENTRY_SIZE;
            let name = name.as_bytes();
            image[base..base + name.len()].copy_from_slice(name);
            put(&mut image, base + 32, *kind as usize);
            if data.is_some() {
                put(&mut image, base + 36, inode);
                inode += 1;
            }
        }

        let mut next_block = 0;
        for (index, data) in files.iter().enumerate() {
            let inode_base = (1 + index) * BLOCK_SIZE;
            put(&mut image, inode_base, data.len());
            for (slot, chunk) in data.chunks(BLOCK_SIZE).enumerate() {
                put(&mut image, inode_base + 4 + slot * 4, next_block);
                let start = (1 + inodes + next_block) * BLOCK_SIZE;
                image[start..start + chunk.len()].copy_from_slice(chunk);
                next_block += 1;
            }
        }
        image
    }
}

/// An executable image whose entry point is `entry`.
pub fn executable(entry: u64) -> Vec<u8> {
    let mut image = vec![0u8; 64];
    image[..4].copy_from_slice(&EXECUTABLE_MAGIC);
    image[ENTRY_POINT_OFFSET..ENTRY_POINT_OFFSET + 8].copy_from_slice(&entry.to_le_bytes());
    image
}

/// Files every scenario starts with.
pub fn standard_files() -> FsImage {
    FsImage::new()
        .directory(".")
        .clock("rtc")
        .file("frame0.txt", b"fish")
        .file("notes.txt", b"not a program")
}

/// Boots a kernel over `files` plus one executable per program.
pub fn boot_kernel(files: FsImage, programs: &[(&'static str, Program)]) -> &'static Kernel<MockPlatform> {
    let platform = MockPlatform::new();
    let mut files = files;
    for (index, (name, program)) in programs.iter().enumerate() {
        let entry = PROGRAM_ENTRY_BASE + index as u64 * 0x10;
        platform.register(entry, *program);
        files = files.file(name, &executable(entry));
    }
    let image: &'static [u8] = Box::leak(files.build().into_boxed_slice());
    let store: &'static BootFs<'static> =
        Box::leak(Box::new(BootFs::new(image).expect("image is well formed")));
    let kernel: &'static Kernel<MockPlatform> = Box::leak(Box::new(Kernel::new(platform)));
    kernel.platform().kernel.call_once(|| kernel);
    kernel.mount(store);
    kernel.boot();
    kernel
}

/// Boots a kernel with the standard files and runs `scenario` as the
/// bootstrap context.
pub fn run(
    programs: &[(&'static str, Program)],
    scenario: impl FnOnce(&'static Kernel<MockPlatform>) + Send + 'static,
) -> Outcome {
    run_with(standard_files(), programs, scenario)
}

/// Like [`run`], over a custom file set.
pub fn run_with(
    files: FsImage,
    programs: &[(&'static str, Program)],
    scenario: impl FnOnce(&'static Kernel<MockPlatform>) + Send + 'static,
) -> Outcome {
    let programs = programs.to_vec();
    let handle = std::thread::Builder::new()
        .stack_size(64 << 20)
        .spawn(move || {
            let kernel = boot_kernel(files, &programs);
            panic::catch_unwind(AssertUnwindSafe(|| scenario(kernel)))
        })
        .expect("failed to spawn scenario thread");
    let result = match handle.join() {
        Ok(result) => result,
        Err(payload) => panic::resume_unwind(payload),
    };
    match result {
        Ok(()) => Outcome::Finished,
        Err(payload) => outcome_of(payload),
    }
}

fn outcome_of(payload: Box<dyn Any + Send>) -> Outcome {
    let payload = match payload.downcast::<TestDone>() {
        Ok(_) => return Outcome::Done,
        Err(payload) => payload,
    };
    let payload = match payload.downcast::<Stalled>() {
        Ok(_) => return Outcome::Stalled,
        Err(payload) => payload,
    };
    let payload = match payload.downcast::<Resume>() {
        Ok(resume) => return Outcome::Resumed(resume.target),
        Err(payload) => payload,
    };
    match payload.downcast::<Exit>() {
        Ok(exit) => Outcome::Exited {
            target: exit.target,
            status: exit.status,
        },
        Err(payload) => panic::resume_unwind(payload),
    }
}
