//! Virtual terminals.
//!
//! Three terminals share one screen. The active one renders straight into
//! live video memory; the others render into their backing frames until
//! they are switched in.
//!
//! # Architecture
//!
//! - `screen`: VGA text cells and rendering into a page
//! - `keyboard`: scancode decoding into terminal actions

pub mod keyboard;
pub mod screen;

pub use keyboard::{Key, KeyDecoder};

use crate::config::{self, LINE_CAPACITY, TERMINALS, VIDEO_MEMORY};
use core::ptr;
use screen::{Cursor, Screen, SCREEN_BYTES};
use trine_hal::{Console, Memory};

/// Index of a virtual terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalId(u8);

impl TerminalId {
    /// The terminal shown at boot.
    pub const FIRST: TerminalId = TerminalId(0);

    /// Returns the id for `index`, if such a terminal exists.
    pub const fn new(index: usize) -> Option<Self> {
        if index < TERMINALS {
            Some(TerminalId(index as u8))
        } else {
            None
        }
    }

    /// Position in the terminal array.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Every terminal, in order.
    pub fn all() -> impl Iterator<Item = TerminalId> {
        (0..TERMINALS as u8).map(TerminalId)
    }
}

/// Keyboard input collected for a pending read.
#[derive(Debug)]
pub struct LineBuffer {
    bytes: [u8; LINE_CAPACITY],
    len: usize,
    reading: bool,
    ready: bool,
}

impl LineBuffer {
    const fn new() -> Self {
        LineBuffer {
            bytes: [0; LINE_CAPACITY],
            len: 0,
            reading: false,
            ready: false,
        }
    }

    /// Starts collecting a fresh line.
    pub fn begin(&mut self) {
        self.len = 0;
        self.ready = false;
        self.reading = true;
    }

    /// Appends a character; refuses when not reading, complete, or full.
    ///
    /// One byte stays reserved for the newline.
    pub fn push(&mut self, byte: u8) -> bool {
        if !self.reading || self.ready || self.len >= LINE_CAPACITY - 1 {
            return false;
        }
        self.bytes[self.len] = byte;
        self.len += 1;
        true
    }

    /// Drops the last character, if any.
    pub fn pop(&mut self) -> bool {
        if !self.reading || self.ready || self.len == 0 {
            return false;
        }
        self.len -= 1;
        true
    }

    /// Marks the line complete; returns false when no read is pending.
    pub fn complete(&mut self) -> bool {
        if !self.reading || self.ready {
            return false;
        }
        self.ready = true;
        true
    }

    /// Characters typed so far.
    pub fn pending(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Hands out a completed line, ending the read.
    ///
    /// Copies at most `buf.len()` bytes and appends a newline when room
    /// remains. Returns `None` while the line is still being typed.
    pub fn take(&mut self, buf: &mut [u8]) -> Option<usize> {
        if !self.ready {
            return None;
        }
        let mut count = self.len.min(buf.len());
        buf[..count].copy_from_slice(&self.bytes[..count]);
        if count < buf.len() {
            buf[count] = b'\n';
            count += 1;
        }
        self.len = 0;
        self.ready = false;
        self.reading = false;
        Some(count)
    }
}

/// One virtual terminal.
#[derive(Debug)]
pub struct Terminal {
    page: u64,
    backing: u64,
    cursor: Cursor,
    line: LineBuffer,
    started: bool,
}

impl Terminal {
    const fn new(index: usize) -> Self {
        Terminal {
            page: config::terminal_backing(index),
            backing: config::terminal_backing(index),
            cursor: Cursor { column: 0, row: 0 },
            line: LineBuffer::new(),
            started: false,
        }
    }
}

/// The fixed set of terminals and which one is on screen.
#[derive(Debug)]
pub struct Terminals {
    terminals: [Terminal; TERMINALS],
    active: TerminalId,
}

impl Terminals {
    /// Boot state: terminal 0 is visible and started.
    pub const fn new() -> Self {
        let mut terminals = [Terminal::new(0), Terminal::new(1), Terminal::new(2)];
        terminals[0].page = VIDEO_MEMORY;
        terminals[0].started = true;
        Terminals {
            terminals,
            active: TerminalId::FIRST,
        }
    }

    /// The terminal on screen.
    pub fn active(&self) -> TerminalId {
        self.active
    }

    /// Whether a shell runs on `id`.
    pub fn is_started(&self, id: TerminalId) -> bool {
        self.terminals[id.index()].started
    }

    /// Sets the started flag of `id`.
    pub fn set_started(&mut self, id: TerminalId, started: bool) {
        self.terminals[id.index()].started = started;
    }

    /// Frame `id` currently renders into.
    pub fn page(&self, id: TerminalId) -> u64 {
        self.terminals[id.index()].page
    }

    /// Some started terminal other than `except`.
    pub fn other_started(&self, except: TerminalId) -> Option<TerminalId> {
        TerminalId::all().find(|&id| id != except && self.is_started(id))
    }

    /// Cursor of `id`.
    pub fn cursor(&self, id: TerminalId) -> Cursor {
        self.terminals[id.index()].cursor
    }

    fn screen<P: Memory>(platform: &P, page: u64) -> Screen {
        // SAFETY: terminal pages are the video frame and the backing frames,
        // all mapped in the kernel window of every address space.
        unsafe { Screen::new(platform.frame(page)) }
    }

    fn sync_cursor<P: Console>(&self, platform: &P, id: TerminalId) {
        if id == self.active {
            let cursor = self.cursor(id);
            platform.set_cursor(cursor.column, cursor.row);
        }
    }

    /// Renders `bytes` on `id`.
    pub fn write<P: Memory + Console>(&mut self, platform: &P, id: TerminalId, bytes: &[u8]) {
        let terminal = &mut self.terminals[id.index()];
        let mut screen = Self::screen(platform, terminal.page);
        for &byte in bytes {
            screen.put(&mut terminal.cursor, byte);
        }
        self.sync_cursor(platform, id);
    }

    /// Blanks `id` and homes its cursor.
    pub fn clear<P: Memory + Console>(&mut self, platform: &P, id: TerminalId) {
        let terminal = &mut self.terminals[id.index()];
        Self::screen(platform, terminal.page).clear(&mut terminal.cursor);
        self.sync_cursor(platform, id);
    }

    /// Starts collecting a line on `id`.
    pub fn begin_read(&mut self, id: TerminalId) {
        self.terminals[id.index()].line.begin();
    }

    /// Takes the completed line of `id`, if any.
    pub fn take_line(&mut self, id: TerminalId, buf: &mut [u8]) -> Option<usize> {
        self.terminals[id.index()].line.take(buf)
    }

    /// Applies a keystroke to the active terminal.
    ///
    /// Returns the requested terminal for a switch, which needs the
    /// scheduler and is left to the caller.
    pub fn handle_key<P: Memory + Console>(&mut self, platform: &P, key: Key) -> Option<TerminalId> {
        let id = self.active;
        match key {
            Key::SwitchTo(target) => return Some(target),
            Key::ClearScreen => {
                self.clear(platform, id);
                let line = &self.terminals[id.index()].line;
                let mut pending = [0u8; LINE_CAPACITY];
                let len = line.pending().len();
                pending[..len].copy_from_slice(line.pending());
                self.write(platform, id, &pending[..len]);
            }
            Key::Enter => {
                if self.terminals[id.index()].line.complete() {
                    self.write(platform, id, b"\n");
                }
            }
            Key::Backspace => {
                let terminal = &mut self.terminals[id.index()];
                if terminal.line.pop() {
                    Self::screen(platform, terminal.page).erase(&mut terminal.cursor);
                    self.sync_cursor(platform, id);
                }
            }
            Key::Char(byte) => {
                if self.terminals[id.index()].line.push(byte) {
                    self.write(platform, id, &[byte]);
                }
            }
        }
        None
    }

    /// Puts `to` on screen; returns the terminal it replaced.
    ///
    /// The leaving terminal's screen is saved to its backing frame and the
    /// entering terminal's backing frame is copied to video memory.
    pub fn switch_display<P: Memory + Console>(&mut self, platform: &P, to: TerminalId) -> TerminalId {
        let from = self.active;
        if from == to {
            return from;
        }
        // SAFETY: all three frames are distinct, mapped and a page long.
        unsafe {
            let live = platform.frame(VIDEO_MEMORY);
            let saved = platform.frame(self.terminals[from.index()].backing);
            let restored = platform.frame(self.terminals[to.index()].backing);
            ptr::copy_nonoverlapping(live, saved, SCREEN_BYTES);
            ptr::copy_nonoverlapping(restored, live, SCREEN_BYTES);
        }
        self.terminals[from.index()].page = self.terminals[from.index()].backing;
        self.terminals[to.index()].page = VIDEO_MEMORY;
        self.active = to;
        self.sync_cursor(platform, to);
        from
    }
}

impl Default for Terminals {
    fn default() -> Self {
        Self::new()
    }
}
