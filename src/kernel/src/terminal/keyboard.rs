//! PS/2 keyboard decoding into terminal actions.

use super::TerminalId;
use bitflags::bitflags;
use pc_keyboard::{
    layouts, DecodedKey, HandleControl, KeyCode, KeyEvent, KeyState, Keyboard, ScancodeSet1,
};

bitflags! {
    /// Modifier keys currently held.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modifiers: u8 {
        const CTRL = 1 << 0;
        const ALT  = 1 << 1;
    }
}

/// What a keystroke asks the terminal layer to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Alt+F1..F3: show another terminal.
    SwitchTo(TerminalId),
    /// Ctrl+L: clear the screen, keeping pending input.
    ClearScreen,
    /// Enter: complete the line.
    Enter,
    /// Backspace: drop the last buffered character.
    Backspace,
    /// A printable character.
    Char(u8),
}

/// Scancode set 1 decoder with modifier tracking.
pub struct KeyDecoder {
    keyboard: Keyboard<layouts::Us104Key, ScancodeSet1>,
    modifiers: Modifiers,
}

impl KeyDecoder {
    /// Creates a decoder with no keys held.
    pub const fn new() -> Self {
        KeyDecoder {
            keyboard: Keyboard::new(
                ScancodeSet1::new(),
                layouts::Us104Key,
                HandleControl::MapLettersToUnicode,
            ),
            modifiers: Modifiers::empty(),
        }
    }

    /// Feeds one scancode byte; returns an action once a key completes.
    pub fn feed(&mut self, scancode: u8) -> Option<Key> {
        let event = self.keyboard.add_byte(scancode).ok().flatten()?;
        self.track_modifiers(&event);

        if self.modifiers.contains(Modifiers::ALT) && event.state == KeyState::Down {
            let target = match event.code {
                KeyCode::F1 => TerminalId::new(0),
                KeyCode::F2 => TerminalId::new(1),
                KeyCode::F3 => TerminalId::new(2),
                _ => None,
            };
            if let Some(target) = target {
                return Some(Key::SwitchTo(target));
            }
        }

        match self.keyboard.process_keyevent(event)? {
            DecodedKey::Unicode('\n') => Some(Key::Enter),
            DecodedKey::Unicode('\x08') => Some(Key::Backspace),
            // Ctrl+L arrives as form feed.
            DecodedKey::Unicode('\x0c') => Some(Key::ClearScreen),
            DecodedKey::Unicode(c) if c.is_ascii() && !c.is_ascii_control() => {
                Some(Key::Char(c as u8))
            }
            _ => None,
        }
    }

    fn track_modifiers(&mut self, event: &KeyEvent) {
        let held = event.state != KeyState::Up;
        match event.code {
            KeyCode::LControl | KeyCode::RControl => self.modifiers.set(Modifiers::CTRL, held),
            KeyCode::LAlt | KeyCode::RAltGr => self.modifiers.set(Modifiers::ALT, held),
            _ => {}
        }
    }

    /// Modifiers currently held.
    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }
}

impl Default for KeyDecoder {
    fn default() -> Self {
        Self::new()
    }
}
