//! # Input Events
//!
//! Normalized gamepad events, independent of the device protocol that
//! produced them. Keys follow the Logitech F710 layout.

use std::fmt;
use std::time::SystemTime;

/// Which physical part of the pad produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputPart {
    Joystick,
    Button,
}

/// Press state carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputState {
    Pressed,
    Released,
}

/// An input key on the pad.
///
/// Each key has a stable non-zero [`code`](InputKey::code), used where a key
/// has to live inside an atomic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKey {
    LeftX,
    LeftY,
    RightX,
    RightY,
    PadX,
    PadY,
    Blue,
    Green,
    Red,
    Yellow,
    FrontUpLeft,
    FrontUpRight,
    FrontDownLeft,
    FrontDownRight,
    Back,
    Start,
}

impl InputKey {
    /// Every key, ordered by code.
    pub const ALL: [InputKey; 16] = [
        InputKey::LeftX,
        InputKey::LeftY,
        InputKey::RightX,
        InputKey::RightY,
        InputKey::PadX,
        InputKey::PadY,
        InputKey::Blue,
        InputKey::Green,
        InputKey::Red,
        InputKey::Yellow,
        InputKey::FrontUpLeft,
        InputKey::FrontUpRight,
        InputKey::FrontDownLeft,
        InputKey::FrontDownRight,
        InputKey::Back,
        InputKey::Start,
    ];

    /// Stable code in `1..=16`. Zero is reserved for "no key".
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8 + 1
    }

    /// Inverse of [`code`](InputKey::code).
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        code.checked_sub(1)
            .and_then(|index| Self::ALL.get(index as usize).copied())
    }

    /// The part of the pad this key belongs to.
    #[must_use]
    pub fn part(self) -> InputPart {
        match self {
            InputKey::LeftX
            | InputKey::LeftY
            | InputKey::RightX
            | InputKey::RightY
            | InputKey::PadX
            | InputKey::PadY => InputPart::Joystick,
            _ => InputPart::Button,
        }
    }
}

impl fmt::Display for InputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InputKey::LeftX => "LEFT_X",
            InputKey::LeftY => "LEFT_Y",
            InputKey::RightX => "RIGHT_X",
            InputKey::RightY => "RIGHT_Y",
            InputKey::PadX => "PAD_X",
            InputKey::PadY => "PAD_Y",
            InputKey::Blue => "BLUE",
            InputKey::Green => "GREEN",
            InputKey::Red => "RED",
            InputKey::Yellow => "YELLOW",
            InputKey::FrontUpLeft => "FRONT_UP_LEFT",
            InputKey::FrontUpRight => "FRONT_UP_RIGHT",
            InputKey::FrontDownLeft => "FRONT_DOWN_LEFT",
            InputKey::FrontDownRight => "FRONT_DOWN_RIGHT",
            InputKey::Back => "BACK",
            InputKey::Start => "START",
        };
        f.write_str(name)
    }
}

/// A single normalized pad event. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputEvent {
    timestamp: SystemTime,
    amount: i16,
    part: InputPart,
    key: InputKey,
    state: InputState,
}

impl InputEvent {
    #[must_use]
    pub fn new(
        timestamp: SystemTime,
        amount: i16,
        part: InputPart,
        key: InputKey,
        state: InputState,
    ) -> Self {
        Self {
            timestamp,
            amount,
            part,
            key,
            state,
        }
    }

    /// A PRESSED event stamped now, with the part derived from the key.
    #[must_use]
    pub fn pressed(key: InputKey, amount: i16) -> Self {
        Self::new(SystemTime::now(), amount, key.part(), key, InputState::Pressed)
    }

    /// A RELEASED event stamped now, with the part derived from the key.
    #[must_use]
    pub fn released(key: InputKey, amount: i16) -> Self {
        Self::new(SystemTime::now(), amount, key.part(), key, InputState::Released)
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn amount(&self) -> i16 {
        self.amount
    }

    pub fn part(&self) -> InputPart {
        self.part
    }

    pub fn key(&self) -> InputKey {
        self.key
    }

    pub fn state(&self) -> InputState {
        self.state
    }

    pub fn is_pressed(&self) -> bool {
        self.state == InputState::Pressed
    }
}
