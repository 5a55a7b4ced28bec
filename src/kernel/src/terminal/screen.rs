//! VGA text-mode rendering into a terminal's display page.
//!
//! A page is either live video memory or a terminal's backing frame; the
//! cell layout is identical, so rendering does not care which.

use core::ptr;

/// Number of rows in VGA text mode.
pub const BUFFER_HEIGHT: usize = 25;

/// Number of columns in VGA text mode.
pub const BUFFER_WIDTH: usize = 80;

/// Bytes of a full screen.
pub const SCREEN_BYTES: usize = BUFFER_WIDTH * BUFFER_HEIGHT * 2;

/// VGA color codes.
///
/// Standard 16-color VGA palette for text mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    /// Black.
    Black = 0,
    /// Blue.
    Blue = 1,
    /// Green.
    Green = 2,
    /// Cyan.
    Cyan = 3,
    /// Red.
    Red = 4,
    /// Magenta.
    Magenta = 5,
    /// Brown.
    Brown = 6,
    /// Light gray.
    LightGray = 7,
    /// Dark gray.
    DarkGray = 8,
    /// Light blue.
    LightBlue = 9,
    /// Light green.
    LightGreen = 10,
    /// Light cyan.
    LightCyan = 11,
    /// Light red.
    LightRed = 12,
    /// Pink.
    Pink = 13,
    /// Yellow.
    Yellow = 14,
    /// White.
    White = 15,
}

/// Combined foreground and background color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct ColorCode(u8);

impl ColorCode {
    /// Creates a new color code from foreground and background colors.
    pub const fn new(foreground: Color, background: Color) -> ColorCode {
        ColorCode((background as u8) << 4 | (foreground as u8))
    }
}

/// Attribute used for all terminal text.
pub const TEXT_COLOR: ColorCode = ColorCode::new(Color::LightGray, Color::Black);

/// A single character cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ScreenChar {
    /// Code page 437 character.
    pub ascii_character: u8,
    /// Cell attribute.
    pub color_code: ColorCode,
}

const BLANK: ScreenChar = ScreenChar {
    ascii_character: b' ',
    color_code: TEXT_COLOR,
};

#[repr(transparent)]
struct Buffer {
    chars: [[ScreenChar; BUFFER_WIDTH]; BUFFER_HEIGHT],
}

/// Cursor position inside a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Column, 0 to `BUFFER_WIDTH - 1`.
    pub column: usize,
    /// Row, 0 to `BUFFER_HEIGHT - 1`.
    pub row: usize,
}

/// Writer over one display page.
pub struct Screen {
    buffer: *mut Buffer,
}

impl Screen {
    /// Wraps the page at `page`.
    ///
    /// # Safety
    ///
    /// `page` must point at `SCREEN_BYTES` writable bytes that stay valid
    /// while the screen is used.
    pub unsafe fn new(page: *mut u8) -> Self {
        Screen { buffer: page.cast() }
    }

    fn write_cell(&mut self, row: usize, column: usize, cell: ScreenChar) {
        debug_assert!(row < BUFFER_HEIGHT && column < BUFFER_WIDTH);
        // SAFETY: indices are in range and the page is valid per `new`.
        // Volatile because the page may be live video memory.
        unsafe { ptr::write_volatile(&mut (*self.buffer).chars[row][column], cell) }
    }

    fn read_cell(&self, row: usize, column: usize) -> ScreenChar {
        // SAFETY: as in `write_cell`.
        unsafe { ptr::read_volatile(&(*self.buffer).chars[row][column]) }
    }

    /// Reads the character at a cell.
    pub fn char_at(&self, row: usize, column: usize) -> u8 {
        self.read_cell(row, column).ascii_character
    }

    /// Writes one byte at `cursor`, advancing it.
    ///
    /// Handles newlines, wrapping at the right edge and scrolling.
    pub fn put(&mut self, cursor: &mut Cursor, byte: u8) {
        match byte {
            b'\n' => self.new_line(cursor),
            byte => {
                if cursor.column >= BUFFER_WIDTH {
                    self.new_line(cursor);
                }
                let shown = match byte {
                    0x20..=0x7e => byte,
                    _ => 0xfe,
                };
                self.write_cell(
                    cursor.row,
                    cursor.column,
                    ScreenChar {
                        ascii_character: shown,
                        color_code: TEXT_COLOR,
                    },
                );
                cursor.column += 1;
            }
        }
    }

    /// Erases the character before `cursor`, moving back across a wrap.
    pub fn erase(&mut self, cursor: &mut Cursor) {
        if cursor.column == 0 {
            if cursor.row == 0 {
                return;
            }
            cursor.row -= 1;
            cursor.column = BUFFER_WIDTH;
        }
        cursor.column -= 1;
        self.write_cell(cursor.row, cursor.column, BLANK);
    }

    fn new_line(&mut self, cursor: &mut Cursor) {
        cursor.column = 0;
        if cursor.row + 1 < BUFFER_HEIGHT {
            cursor.row += 1;
            return;
        }
        for row in 1..BUFFER_HEIGHT {
            for column in 0..BUFFER_WIDTH {
                let cell = self.read_cell(row, column);
                self.write_cell(row - 1, column, cell);
            }
        }
        self.clear_row(BUFFER_HEIGHT - 1);
    }

    fn clear_row(&mut self, row: usize) {
        for column in 0..BUFFER_WIDTH {
            self.write_cell(row, column, BLANK);
        }
    }

    /// Blanks the page and homes the cursor.
    pub fn clear(&mut self, cursor: &mut Cursor) {
        for row in 0..BUFFER_HEIGHT {
            self.clear_row(row);
        }
        *cursor = Cursor::default();
    }
}
