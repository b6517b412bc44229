//! Key mapping for session input
//!
//! Converts key events to the byte sequences sent to the telnet server.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// Key mapper for converting key events to bytes
pub struct KeyMapper;

impl KeyMapper {
    /// Map a key event to bytes, or `None` for keys with no encoding
    pub fn map(event: &KeyEvent) -> Option<Vec<u8>> {
        let mods = Modifiers::from(event.modifiers);

        match event.code {
            KeyCode::Char(ch) => Some(Self::map_char(ch, mods)),

            // Bare CR goes out as CR NUL on a telnet stream
            KeyCode::Enter => Some(vec![0x0D, 0x00]),

            KeyCode::Backspace => {
                if mods.contains(Modifiers::ALT) {
                    Some(vec![0x1B, 0x7F])
                } else {
                    Some(vec![0x7F])
                }
            }

            KeyCode::Tab => Some(vec![0x09]),
            KeyCode::BackTab => Some(b"\x1b[Z".to_vec()),
            KeyCode::Esc => Some(vec![0x1B]),

            KeyCode::Up => Some(Self::csi_key(b'A', mods)),
            KeyCode::Down => Some(Self::csi_key(b'B', mods)),
            KeyCode::Right => Some(Self::csi_key(b'C', mods)),
            KeyCode::Left => Some(Self::csi_key(b'D', mods)),
            KeyCode::Home => Some(Self::csi_key(b'H', mods)),
            KeyCode::End => Some(Self::csi_key(b'F', mods)),

            KeyCode::Insert => Some(Self::tilde_key(2, mods)),
            KeyCode::Delete => Some(Self::tilde_key(3, mods)),
            KeyCode::PageUp => Some(Self::tilde_key(5, mods)),
            KeyCode::PageDown => Some(Self::tilde_key(6, mods)),

            KeyCode::F(n) => Self::function_key(n, mods),

            _ => None,
        }
    }

    /// Map a character with modifiers
    fn map_char(ch: char, mods: Modifiers) -> Vec<u8> {
        if mods.contains(Modifiers::CTRL) {
            if let Some(code) = Self::control_code(ch) {
                return if mods.contains(Modifiers::ALT) {
                    vec![0x1B, code]
                } else {
                    vec![code]
                };
            }
        }

        let mut bytes = Vec::new();
        if mods.contains(Modifiers::ALT) {
            bytes.push(0x1B);
        }
        let mut utf8 = [0u8; 4];
        bytes.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
        bytes
    }

    /// Control character for Ctrl+key
    fn control_code(ch: char) -> Option<u8> {
        match ch {
            'a'..='z' => Some(ch as u8 - b'a' + 1),
            'A'..='Z' => Some(ch as u8 - b'A' + 1),
            '@' | '`' | ' ' => Some(0x00),
            '[' => Some(0x1B),
            '\\' => Some(0x1C),
            ']' => Some(0x1D),
            '^' | '~' => Some(0x1E),
            '_' | '?' => Some(0x1F),
            // Unix consoles report 0x1C..=0x1F as Ctrl+4..Ctrl+7
            '4'..='7' => Some(ch as u8 - b'4' + 0x1C),
            _ => None,
        }
    }

    /// Cursor and Home/End keys: ESC [ <key>, or ESC [ 1 ; <mod> <key>
    fn csi_key(key: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            vec![0x1B, b'[', key]
        } else {
            format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes()
        }
    }

    /// Editing keys: ESC [ <code> ~, or ESC [ <code> ; <mod> ~
    fn tilde_key(code: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            format!("\x1b[{}~", code).into_bytes()
        } else {
            format!("\x1b[{};{}~", code, Self::modifier_code(mods)).into_bytes()
        }
    }

    fn function_key(n: u8, mods: Modifiers) -> Option<Vec<u8>> {
        match n {
            1..=4 => {
                let key = b"PQRS"[(n - 1) as usize];
                if mods.is_empty() {
                    Some(vec![0x1B, b'O', key])
                } else {
                    Some(format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes())
                }
            }
            5..=12 => {
                let code = [15, 17, 18, 19, 20, 21, 23, 24][(n - 5) as usize];
                Some(Self::tilde_key(code, mods))
            }
            _ => None,
        }
    }

    /// xterm modifier parameter
    fn modifier_code(mods: Modifiers) -> u8 {
        1 + if mods.contains(Modifiers::SHIFT) { 1 } else { 0 }
            + if mods.contains(Modifiers::ALT) { 2 } else { 0 }
            + if mods.contains(Modifiers::CTRL) { 4 } else { 0 }
    }
}
