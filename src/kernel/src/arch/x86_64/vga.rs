//! VGA text mode hardware cursor.
//!
//! Text itself is rendered by the terminal module straight into the
//! frames; this driver only programs the CRT controller.

use crate::terminal::screen::{BUFFER_HEIGHT, BUFFER_WIDTH};
use spin::Mutex;
use x86_64::instructions::port::Port;

const CRTC_INDEX: u16 = 0x3D4;
const CRTC_DATA: u16 = 0x3D5;

const CURSOR_LOCATION_HIGH: u8 = 0x0E;
const CURSOR_LOCATION_LOW: u8 = 0x0F;

struct Crtc {
    index: Port<u8>,
    data: Port<u8>,
}

static CRTC: Mutex<Crtc> = Mutex::new(Crtc {
    index: Port::new(CRTC_INDEX),
    data: Port::new(CRTC_DATA),
});

/// Moves the blinking cursor to (`column`, `row`), clamped to the screen.
pub fn set_cursor(column: usize, row: usize) {
    let column = column.min(BUFFER_WIDTH - 1);
    let row = row.min(BUFFER_HEIGHT - 1);
    let [low, high] = ((row * BUFFER_WIDTH + column) as u16).to_le_bytes();
    let mut crtc = CRTC.lock();
    // SAFETY: the cursor location registers only affect the cursor.
    unsafe {
        crtc.index.write(CURSOR_LOCATION_HIGH);
        crtc.data.write(high);
        crtc.index.write(CURSOR_LOCATION_LOW);
        crtc.data.write(low);
    }
}
