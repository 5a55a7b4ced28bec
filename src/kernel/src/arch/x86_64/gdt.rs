//! Global Descriptor Table (GDT) and Task-State Segment (TSS).
//!
//! The GDT carries flat kernel and user segments plus the TSS. The TSS
//! `rsp0` slot is rewritten on every task switch so that traps from user
//! mode land on the current task's kernel stack.

use core::ptr::{addr_of, addr_of_mut};
use lazy_static::lazy_static;
use x86_64::instructions::segmentation::{Segment, CS, DS, ES, SS};
use x86_64::instructions::tables::load_tss;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::VirtAddr;

/// IST slot of the double-fault stack.
pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

const IST_STACK_SIZE: usize = 16 * 1024;

/// 16-byte aligned backing storage for the double-fault stack.
#[repr(align(16))]
struct IstStack([u8; IST_STACK_SIZE]);

static mut DOUBLE_FAULT_STACK: IstStack = IstStack([0; IST_STACK_SIZE]);

// Written only by `init` and `set_kernel_stack`, both with interrupts
// masked on the single CPU.
static mut TSS: TaskStateSegment = TaskStateSegment::new();

/// Segment selectors of the loaded GDT.
#[derive(Debug, Clone, Copy)]
pub struct Selectors {
    /// Ring 0 code.
    pub kernel_code: SegmentSelector,
    /// Ring 0 data and stack.
    pub kernel_data: SegmentSelector,
    /// Ring 3 code.
    pub user_code: SegmentSelector,
    /// Ring 3 data and stack.
    pub user_data: SegmentSelector,
    tss: SegmentSelector,
}

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();
        let kernel_code = gdt.add_entry(Descriptor::kernel_code_segment());
        let kernel_data = gdt.add_entry(Descriptor::kernel_data_segment());
        let user_data = gdt.add_entry(Descriptor::user_data_segment());
        let user_code = gdt.add_entry(Descriptor::user_code_segment());
        // SAFETY: the TSS is a static that lives for the whole kernel run.
        let tss = gdt.add_entry(Descriptor::tss_segment(unsafe { &*addr_of!(TSS) }));
        (
            gdt,
            Selectors {
                kernel_code,
                kernel_data,
                user_code,
                user_data,
                tss,
            },
        )
    };
}

/// Loads the GDT and the TSS.
pub fn init() {
    // SAFETY: runs once during early boot, before the TSS is in use.
    unsafe {
        let stack = VirtAddr::from_ptr(addr_of!(DOUBLE_FAULT_STACK));
        (*addr_of_mut!(TSS)).interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] =
            stack + IST_STACK_SIZE as u64;
    }

    GDT.0.load();
    let selectors = &GDT.1;
    // SAFETY: the selectors index the GDT that was just loaded.
    unsafe {
        CS::set_reg(selectors.kernel_code);
        DS::set_reg(selectors.kernel_data);
        ES::set_reg(selectors.kernel_data);
        SS::set_reg(selectors.kernel_data);
        load_tss(selectors.tss);
    }
}

/// Selectors of the loaded GDT.
pub fn selectors() -> &'static Selectors {
    &GDT.1
}

/// Points ring 0 re-entry at `top`.
pub fn set_kernel_stack(top: u64) {
    // SAFETY: single CPU; callers hold interrupts masked.
    unsafe {
        (*addr_of_mut!(TSS)).privilege_stack_table[0] = VirtAddr::new(top);
    }
}
