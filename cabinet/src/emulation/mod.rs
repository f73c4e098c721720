//! The narrow interface the engine drives emulation cores through. The engine never looks inside
//! a core; it loads a ROM, ticks it, renders frames, and moves its state in and out as bytes.

#[cfg(any(test, feature = "testing"))]
pub mod scripted;

use std::fmt::Display;

use serde::Deserialize;
use serde::Serialize;

use crate::CoreError;
use crate::Frame;

/// The joypad buttons shared by every console family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Button {
    Up,
    Down,
    Left,
    Right,
    A,
    B,
    Start,
    Select,
}

impl Button {
    pub const ALL: [Button; 8] = [
        Button::Up,
        Button::Down,
        Button::Left,
        Button::Right,
        Button::A,
        Button::B,
        Button::Start,
        Button::Select,
    ];

    /// The button that can not be held at the same time as this one, if any.
    pub const fn opposite(self) -> Option<Button> {
        match self {
            Button::Up => Some(Button::Down),
            Button::Down => Some(Button::Up),
            Button::Left => Some(Button::Right),
            Button::Right => Some(Button::Left),
            _ => None,
        }
    }

    /// The bit this button occupies in a one-player controller byte.
    pub const fn controller_bit(self) -> u8 {
        match self {
            Button::Right => 0x01,
            Button::Left => 0x02,
            Button::Down => 0x04,
            Button::Up => 0x08,
            Button::Start => 0x10,
            Button::Select => 0x20,
            Button::B => 0x40,
            Button::A => 0x80,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Button::Up => "up",
            Button::Down => "down",
            Button::Left => "left",
            Button::Right => "right",
            Button::A => "a",
            Button::B => "b",
            Button::Start => "start",
            Button::Select => "select",
        }
    }
}

impl Display for Button {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An input delivered to a core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputEvent {
    /// A single-joypad button goes down.
    Press(Button),
    /// A single-joypad button goes up.
    Release(Button),
    /// The whole two-player controller word. The low byte is player one, the high byte player two.
    Controller(u16),
}

/// A running emulation core. Cores are not reentrant; the engine guarantees that at most one call
/// is in flight for a given core at any time.
pub trait EmulatorCore: Send {
    fn load_rom(&mut self, rom: &[u8]) -> Result<(), CoreError>;

    /// Runs the core for `ticks` frame periods.
    fn tick(&mut self, ticks: u32) -> Result<(), CoreError>;

    /// Renders the current screen. Returns `None` when the core has nothing to show, e.g. while
    /// the display is switched off.
    fn render_frame(&mut self) -> Option<Frame>;

    /// Serializes the complete machine state. Loading these bytes into a fresh core that runs the
    /// same ROM must reproduce the machine exactly.
    fn serialize_state(&self) -> Result<Vec<u8>, CoreError>;

    fn deserialize_state(&mut self, state: &[u8]) -> Result<(), CoreError>;

    fn send_input(&mut self, event: InputEvent);

    /// Releases the core and everything it holds. The core is not used afterwards.
    fn stop(&mut self) -> Result<(), CoreError>;

    /// Whether the core is sitting at its boot vector, i.e. no game code has run yet.
    fn is_at_boot(&self) -> bool {
        false
    }
}

/// Builds fresh cores for one console family.
pub trait CoreFactory: Send + Sync {
    fn build(&self) -> Result<Box<dyn EmulatorCore>, CoreError>;
}

impl<F> CoreFactory for F
where
    F: Fn() -> Result<Box<dyn EmulatorCore>, CoreError> + Send + Sync,
{
    fn build(&self) -> Result<Box<dyn EmulatorCore>, CoreError> {
        self()
    }
}
