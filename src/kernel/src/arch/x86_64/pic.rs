//! Support for the primary and secondary 8259 Programmable Interrupt Controllers (PICs).

use pic8259::ChainedPics;
use spin::Mutex;

/// The offset of the first PIC (master).
///
/// IRQs 0..7 are mapped to interrupts 32..39.
pub const PIC_1_OFFSET: u8 = 32;

/// The offset of the second PIC (slave).
///
/// IRQs 8..15 are mapped to interrupts 40..47.
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

/// Line the secondary PIC is chained on.
const CASCADE_IRQ: u8 = 2;

/// The global instance of the chained PICs.
pub static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

/// Interrupt vector of IRQ line `irq`.
pub const fn vector(irq: u8) -> u8 {
    PIC_1_OFFSET + irq
}

/// Remaps both PICs and masks every line.
pub fn init() {
    let mut pics = PICS.lock();
    // SAFETY: the offsets do not overlap the CPU exception vectors.
    unsafe {
        pics.initialize();
        pics.write_masks(0xFF, 0xFF);
    }
}

fn set_masked(irq: u8, masked: bool) {
    let mut pics = PICS.lock();
    // SAFETY: only the mask registers are touched.
    unsafe {
        let [mut primary, mut secondary] = pics.read_masks();
        let (mask, bit) = if irq < 8 {
            (&mut primary, irq)
        } else {
            (&mut secondary, irq - 8)
        };
        if masked {
            *mask |= 1 << bit;
        } else {
            *mask &= !(1 << bit);
        }
        pics.write_masks(primary, secondary);
    }
}

/// Unmasks `irq`, and the cascade line for secondary lines.
pub fn enable(irq: u8) {
    set_masked(irq, false);
    if irq >= 8 {
        set_masked(CASCADE_IRQ, false);
    }
}

/// Masks `irq`.
pub fn disable(irq: u8) {
    set_masked(irq, true);
}

/// Signals end of interrupt for `irq`.
pub fn end_of_interrupt(irq: u8) {
    // SAFETY: called once per delivered interrupt on that line.
    unsafe {
        PICS.lock().notify_end_of_interrupt(vector(irq));
    }
}
