//! Keyboard usages for key injection
//!
//! Key codes are HID keyboard/keypad page usages, which is what the event bus
//! consumes directly.

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, ProtocolResult};

/// HID usage page for keyboards and keypads
pub const KEYBOARD_USAGE_PAGE: u16 = 0x07;

/// Keyboard key identified by its HID usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum VirtualKeyCode {
    A = 0x04,
    B = 0x05,
    C = 0x06,
    D = 0x07,
    E = 0x08,
    F = 0x09,
    G = 0x0A,
    H = 0x0B,
    I = 0x0C,
    J = 0x0D,
    K = 0x0E,
    L = 0x0F,
    M = 0x10,
    N = 0x11,
    O = 0x12,
    P = 0x13,
    Q = 0x14,
    R = 0x15,
    S = 0x16,
    T = 0x17,
    U = 0x18,
    V = 0x19,
    W = 0x1A,
    X = 0x1B,
    Y = 0x1C,
    Z = 0x1D,

    Num1 = 0x1E,
    Num2 = 0x1F,
    Num3 = 0x20,
    Num4 = 0x21,
    Num5 = 0x22,
    Num6 = 0x23,
    Num7 = 0x24,
    Num8 = 0x25,
    Num9 = 0x26,
    Num0 = 0x27,

    Enter = 0x28,
    Escape = 0x29,
    Backspace = 0x2A,
    Tab = 0x2B,
    Space = 0x2C,
    Minus = 0x2D,
    Equal = 0x2E,
    LeftBracket = 0x2F,
    RightBracket = 0x30,
    Backslash = 0x31,
    Semicolon = 0x33,
    Quote = 0x34,
    Grave = 0x35,
    Comma = 0x36,
    Period = 0x37,
    Slash = 0x38,

    Right = 0x4F,
    Left = 0x50,
    Down = 0x51,
    Up = 0x52,

    LeftShift = 0xE1,
}

impl VirtualKeyCode {
    const LETTERS: [VirtualKeyCode; 26] = [
        Self::A, Self::B, Self::C, Self::D, Self::E, Self::F, Self::G, Self::H, Self::I,
        Self::J, Self::K, Self::L, Self::M, Self::N, Self::O, Self::P, Self::Q, Self::R,
        Self::S, Self::T, Self::U, Self::V, Self::W, Self::X, Self::Y, Self::Z,
    ];

    const DIGITS: [VirtualKeyCode; 10] = [
        Self::Num0, Self::Num1, Self::Num2, Self::Num3, Self::Num4,
        Self::Num5, Self::Num6, Self::Num7, Self::Num8, Self::Num9,
    ];

    /// HID usage on the keyboard page
    pub fn usage(self) -> u16 {
        self as u16
    }
}

/// A key press needed to produce one character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStroke {
    pub key: VirtualKeyCode,
    pub shift: bool,
}

impl KeyStroke {
    fn plain(key: VirtualKeyCode) -> Self {
        Self { key, shift: false }
    }

    fn shifted(key: VirtualKeyCode) -> Self {
        Self { key, shift: true }
    }

    /// Map a printable ASCII character (plus tab and newline) to a key stroke
    /// on a US layout
    pub fn from_char(c: char) -> ProtocolResult<Self> {
        use VirtualKeyCode as K;

        let stroke = match c {
            'a'..='z' => Self::plain(K::LETTERS[(c as u8 - b'a') as usize]),
            'A'..='Z' => Self::shifted(K::LETTERS[(c as u8 - b'A') as usize]),
            '0'..='9' => Self::plain(K::DIGITS[(c as u8 - b'0') as usize]),
            '\n' | '\r' => Self::plain(K::Enter),
            '\t' => Self::plain(K::Tab),
            ' ' => Self::plain(K::Space),
            '-' => Self::plain(K::Minus),
            '=' => Self::plain(K::Equal),
            '[' => Self::plain(K::LeftBracket),
            ']' => Self::plain(K::RightBracket),
            '\\' => Self::plain(K::Backslash),
            ';' => Self::plain(K::Semicolon),
            '\'' => Self::plain(K::Quote),
            '`' => Self::plain(K::Grave),
            ',' => Self::plain(K::Comma),
            '.' => Self::plain(K::Period),
            '/' => Self::plain(K::Slash),
            '!' => Self::shifted(K::Num1),
            '@' => Self::shifted(K::Num2),
            '#' => Self::shifted(K::Num3),
            '$' => Self::shifted(K::Num4),
            '%' => Self::shifted(K::Num5),
            '^' => Self::shifted(K::Num6),
            '&' => Self::shifted(K::Num7),
            '*' => Self::shifted(K::Num8),
            '(' => Self::shifted(K::Num9),
            ')' => Self::shifted(K::Num0),
            '_' => Self::shifted(K::Minus),
            '+' => Self::shifted(K::Equal),
            '{' => Self::shifted(K::LeftBracket),
            '}' => Self::shifted(K::RightBracket),
            '|' => Self::shifted(K::Backslash),
            ':' => Self::shifted(K::Semicolon),
            '"' => Self::shifted(K::Quote),
            '~' => Self::shifted(K::Grave),
            '<' => Self::shifted(K::Comma),
            '>' => Self::shifted(K::Period),
            '?' => Self::shifted(K::Slash),
            other => return Err(ProtocolError::UnsupportedCharacter(other)),
        };
        Ok(stroke)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letters_map_to_hid_usages() {
        assert_eq!(KeyStroke::from_char('a').unwrap().key.usage(), 0x04);
        assert_eq!(KeyStroke::from_char('z').unwrap().key.usage(), 0x1D);
        let upper = KeyStroke::from_char('Q').unwrap();
        assert_eq!(upper.key, VirtualKeyCode::Q);
        assert!(upper.shift);
    }

    #[test]
    fn test_digits_and_symbols() {
        assert_eq!(KeyStroke::from_char('0').unwrap().key, VirtualKeyCode::Num0);
        assert_eq!(KeyStroke::from_char('1').unwrap().key.usage(), 0x1E);
        let bang = KeyStroke::from_char('!').unwrap();
        assert_eq!(bang.key, VirtualKeyCode::Num1);
        assert!(bang.shift);
        assert!(!KeyStroke::from_char('/').unwrap().shift);
    }

    #[test]
    fn test_non_ascii_rejected() {
        assert!(matches!(
            KeyStroke::from_char('é'),
            Err(ProtocolError::UnsupportedCharacter('é'))
        ));
    }
}
