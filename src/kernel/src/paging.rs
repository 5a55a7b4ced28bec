//! Per-task address spaces.
//!
//! Every task slot owns a statically reserved hierarchy. The PML4 and PDPT
//! only route the low GiB to the slot's page directory, which carries all
//! real mappings:
//!
//! - the kernel window, identity mapped with large pages, supervisor only;
//! - a small-page table for live video memory and the terminal backing frames;
//! - the 4 MiB program image, user accessible;
//! - optionally the `vidmap` page, through a table owned by the task's terminal.
//!
//! A large page spans two consecutive 2 MiB directory entries.

use crate::config::{
    KERNEL_STACK_TOP, KERNEL_WINDOW_BASE, LARGE_PAGE_SIZE, MAX_TASKS, PAGE_SIZE, TERMINALS,
    VIDEO_MEMORY,
};
use crate::config;
use trine_common::SysError;
use trine_hal::Mmu;
use x86_64::structures::paging::{PageTable, PageTableFlags as Flags};
use x86_64::PhysAddr;

/// Bytes covered by one directory entry.
const DIRECTORY_SPAN: u64 = 0x20_0000;

/// Directory entries per large page.
const SPANS_PER_LARGE_PAGE: usize = (LARGE_PAGE_SIZE / DIRECTORY_SPAN) as usize;

/// Everything a task can map lives below this address.
const ADDRESSABLE_LIMIT: u64 = 1 << 30;

/// Virtual addresses reserved for the display table and the kernel window.
const RESERVED_VIRT_END: u64 = KERNEL_STACK_TOP;

/// Reasons a mapping request is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// Address not aligned to the page size it asks for.
    Misaligned,
    /// Range outside the part of the address space a directory covers.
    OutOfRange,
    /// Range overlaps the kernel window or the display table.
    KernelCollision,
    /// Target directory entry already maps a large page.
    Occupied,
}

impl From<MapError> for SysError {
    fn from(err: MapError) -> Self {
        match err {
            MapError::Misaligned | MapError::OutOfRange => SysError::InvalidArgument,
            MapError::KernelCollision | MapError::Occupied => SysError::PermissionDenied,
        }
    }
}

/// Privilege level of a present mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// Reachable from user mode.
    User,
    /// Kernel only.
    Supervisor,
}

/// The tables owned by one task slot.
#[repr(C)]
struct AddressSpace {
    pml4: PageTable,
    pdpt: PageTable,
    directory: PageTable,
    video: PageTable,
}

impl AddressSpace {
    const fn new() -> Self {
        AddressSpace {
            pml4: PageTable::new(),
            pdpt: PageTable::new(),
            directory: PageTable::new(),
            video: PageTable::new(),
        }
    }
}

/// All address spaces of the task pool, plus one `vidmap` table per terminal.
pub struct AddressSpaces {
    spaces: [AddressSpace; MAX_TASKS],
    vidmap: [PageTable; TERMINALS],
}

fn frame_of(table: &PageTable) -> PhysAddr {
    // The kernel window is identity mapped, so a table's address is its frame.
    PhysAddr::new(table as *const PageTable as u64)
}

fn directory_index(virt: u64) -> usize {
    ((virt / DIRECTORY_SPAN) & 0x1FF) as usize
}

fn table_index(virt: u64) -> usize {
    ((virt / PAGE_SIZE) & 0x1FF) as usize
}

fn overlaps(base: u64, len: u64, start: u64, end: u64) -> bool {
    base < end && start < base + len
}

impl AddressSpaces {
    /// Creates the pool with every entry not present.
    pub const fn new() -> Self {
        AddressSpaces {
            spaces: [const { AddressSpace::new() }; MAX_TASKS],
            vidmap: [const { PageTable::new() }; TERMINALS],
        }
    }

    /// Marks every entry of `slot` not present and rewires its upper levels.
    pub fn disable_all(&mut self, slot: usize) {
        let space = &mut self.spaces[slot];
        space.pml4.zero();
        space.pdpt.zero();
        space.directory.zero();
        space.video.zero();

        let routing = Flags::PRESENT | Flags::WRITABLE | Flags::USER_ACCESSIBLE;
        let pdpt = frame_of(&space.pdpt);
        let directory = frame_of(&space.directory);
        space.pml4[0].set_addr(pdpt, routing);
        space.pdpt[0].set_addr(directory, routing);
    }

    /// Identity maps the kernel window: present, supervisor, global.
    pub fn init_kernel_mapping(&mut self, slot: usize) {
        let flags = Flags::PRESENT | Flags::WRITABLE | Flags::HUGE_PAGE | Flags::GLOBAL;
        let directory = &mut self.spaces[slot].directory;
        for span in 0..SPANS_PER_LARGE_PAGE {
            let addr = KERNEL_WINDOW_BASE + span as u64 * DIRECTORY_SPAN;
            directory[directory_index(addr)].set_addr(PhysAddr::new(addr), flags);
        }
    }

    /// Maps live video memory and the three terminal backing frames.
    pub fn init_display_mapping(&mut self, slot: usize) {
        let flags = Flags::PRESENT | Flags::WRITABLE;
        let space = &mut self.spaces[slot];
        let frames = core::iter::once(VIDEO_MEMORY).chain((0..TERMINALS).map(config::terminal_backing));
        for frame in frames {
            space.video[table_index(frame)].set_addr(PhysAddr::new(frame), flags);
        }
        let video = frame_of(&space.video);
        space.directory[directory_index(VIDEO_MEMORY)].set_addr(video, flags);
    }

    /// Maps a 4 MiB user program image at `virt`.
    pub fn map_large_page(&mut self, slot: usize, phys: u64, virt: u64) -> Result<(), MapError> {
        if phys % LARGE_PAGE_SIZE != 0 || virt % LARGE_PAGE_SIZE != 0 {
            return Err(MapError::Misaligned);
        }
        if virt + LARGE_PAGE_SIZE > ADDRESSABLE_LIMIT {
            return Err(MapError::OutOfRange);
        }
        if overlaps(phys, LARGE_PAGE_SIZE, KERNEL_WINDOW_BASE, KERNEL_STACK_TOP)
            || overlaps(virt, LARGE_PAGE_SIZE, 0, RESERVED_VIRT_END)
        {
            return Err(MapError::KernelCollision);
        }

        let flags = Flags::PRESENT | Flags::WRITABLE | Flags::USER_ACCESSIBLE | Flags::HUGE_PAGE;
        let directory = &mut self.spaces[slot].directory;
        for span in 0..SPANS_PER_LARGE_PAGE {
            let offset = span as u64 * DIRECTORY_SPAN;
            directory[directory_index(virt + offset)].set_addr(PhysAddr::new(phys + offset), flags);
        }
        Ok(())
    }

    /// Maps one user page at `virt` through `terminal`'s private table.
    ///
    /// The table is wiped first, so it holds exactly this mapping afterwards.
    pub fn map_small_page(
        &mut self,
        slot: usize,
        terminal: usize,
        phys: u64,
        virt: u64,
    ) -> Result<(), MapError> {
        if phys % PAGE_SIZE != 0 || virt % PAGE_SIZE != 0 {
            return Err(MapError::Misaligned);
        }
        if virt >= ADDRESSABLE_LIMIT {
            return Err(MapError::OutOfRange);
        }
        if virt < RESERVED_VIRT_END {
            return Err(MapError::KernelCollision);
        }
        let entry = &self.spaces[slot].directory[directory_index(virt)];
        if entry.flags().contains(Flags::HUGE_PAGE) {
            return Err(MapError::Occupied);
        }

        let flags = Flags::PRESENT | Flags::WRITABLE | Flags::USER_ACCESSIBLE;
        let table = &mut self.vidmap[terminal];
        table.zero();
        table[table_index(virt)].set_addr(PhysAddr::new(phys), flags);
        let table = frame_of(table);
        self.spaces[slot].directory[directory_index(virt)].set_addr(table, flags);
        Ok(())
    }

    /// Points `terminal`'s existing mapping of `virt` at a different frame.
    pub fn remap(&mut self, terminal: usize, phys: u64, virt: u64) {
        let entry = &mut self.vidmap[terminal][table_index(virt)];
        let flags = entry.flags();
        entry.set_addr(PhysAddr::new(phys), flags);
    }

    /// Privilege of the mapping covering `virt` in `slot`, if present.
    pub fn permission_of(&self, slot: usize, virt: u64) -> Option<Privilege> {
        if virt >= ADDRESSABLE_LIMIT {
            return None;
        }
        let entry = &self.spaces[slot].directory[directory_index(virt)];
        let outer = entry.flags();
        if !outer.contains(Flags::PRESENT) {
            return None;
        }
        let flags = if outer.contains(Flags::HUGE_PAGE) {
            outer
        } else {
            let table = self.table_at(slot, entry.addr())?;
            let inner = table[table_index(virt)].flags();
            if !inner.contains(Flags::PRESENT) {
                return None;
            }
            inner & outer
        };
        if flags.contains(Flags::USER_ACCESSIBLE) {
            Some(Privilege::User)
        } else {
            Some(Privilege::Supervisor)
        }
    }

    /// Resolves a directory entry's target to one of the tables owned here.
    fn table_at(&self, slot: usize, frame: PhysAddr) -> Option<&PageTable> {
        let video = &self.spaces[slot].video;
        core::iter::once(video)
            .chain(self.vidmap.iter())
            .find(|table| frame_of(table) == frame)
    }

    /// Physical address of `slot`'s top-level table.
    pub fn root(&self, slot: usize) -> u64 {
        frame_of(&self.spaces[slot].pml4).as_u64()
    }

    /// Makes `slot`'s hierarchy the paging root.
    pub fn activate(&self, slot: usize, mmu: &impl Mmu) {
        // SAFETY: every slot maps the kernel window once rebuilt, and the
        // tables live inside the kernel window for as long as the pool does.
        unsafe { mmu.load_root(self.root(slot)) };
    }

    /// Activates `slot` and discards stale translations.
    pub fn reload(&self, slot: usize, mmu: &impl Mmu) {
        self.activate(slot, mmu);
        mmu.flush_tlb();
    }

    /// Re-initializes `slot` for a task: kernel, display and program image.
    pub fn rebuild(&mut self, slot: usize) -> Result<(), MapError> {
        self.disable_all(slot);
        self.init_kernel_mapping(slot);
        self.init_display_mapping(slot);
        if slot != 0 {
            self.map_large_page(slot, config::program_image_phys(slot), config::PROGRAM_IMAGE_VIRT)?;
        }
        Ok(())
    }
}

impl Default for AddressSpaces {
    fn default() -> Self {
        Self::new()
    }
}
