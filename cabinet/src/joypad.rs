//! Joypad tokens, the held-button models of each console family, and the controller overlay drawn
//! on top of every frame.

use std::str::FromStr;

use indexmap::IndexSet;
use serde::Deserialize;
use serde::Serialize;

use crate::frame::Paint;
use crate::frame::Rect;
use crate::Button;
use crate::Console;
use crate::Frame;
use crate::InputEvent;
use crate::SessionError;

/// What a player asked for: either run the game for a number of frames without touching the
/// joypad, or press a button (which also runs the game for one frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoypadToken {
    Advance(u32),
    Button(Button),
}

impl JoypadToken {
    /// The press carried by the token, if any, and the number of frames to run for.
    pub fn split(self, player: usize) -> (Option<JoypadPress>, u32) {
        match self {
            JoypadToken::Advance(frames) => (None, frames),
            JoypadToken::Button(button) => (Some(JoypadPress { button, player }), 1),
        }
    }
}

impl FromStr for JoypadToken {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim().to_ascii_lowercase();
        let digest = match token.as_str() {
            "frame 1" => JoypadToken::Advance(1),
            "frame 10" => JoypadToken::Advance(10),
            "frame 30" => JoypadToken::Advance(30),
            "frame 60" => JoypadToken::Advance(60),
            other => Button::ALL
                .into_iter()
                .find(|button| button.name() == other)
                .map(JoypadToken::Button)
                .ok_or_else(|| SessionError::UnknownButton {
                    token: s.to_owned(),
                })?,
        };
        Ok(digest)
    }
}

/// A button press by the player holding the joypad at `player` (the position of the user in the
/// session's authorized list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JoypadPress {
    pub button: Button,
    pub player: usize,
}

/// The buttons currently held down on a console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoypadState {
    /// A single joypad. Buttons stay held between requests; pressing one half of the up/down or
    /// left/right pair lets go of the other half.
    Handheld { held: IndexSet<Button> },
    /// Two joypads sharing one controller word. Each press toggles the button's bit, and the
    /// second player's bits live in the high byte.
    DualJoypad { controller: u16 },
}

impl JoypadState {
    pub fn new(console: Console) -> Self {
        match console {
            Console::Handheld => JoypadState::Handheld { held: IndexSet::new() },
            Console::DualJoypad => JoypadState::DualJoypad { controller: 0 },
        }
    }

    pub fn console(&self) -> Console {
        match self {
            JoypadState::Handheld { .. } => Console::Handheld,
            JoypadState::DualJoypad { .. } => Console::DualJoypad,
        }
    }

    /// Applies a press and returns the events the core has to see, in order.
    pub(crate) fn press(&mut self, JoypadPress { button, player }: JoypadPress) -> Vec<InputEvent> {
        match self {
            JoypadState::Handheld { held } => {
                let mut digest = Vec::with_capacity(2);
                if let Some(opposite) = button.opposite() {
                    if held.shift_remove(&opposite) {
                        digest.push(InputEvent::Release(opposite));
                    }
                }
                held.insert(button);
                digest.push(InputEvent::Press(button));
                digest
            }
            JoypadState::DualJoypad { controller } => {
                *controller ^= (button.controller_bit() as u16) << player_shift(player);
                vec![InputEvent::Controller(*controller)]
            }
        }
    }

    pub fn is_held(&self, button: Button, player: usize) -> bool {
        match self {
            JoypadState::Handheld { held } => player == 0 && held.contains(&button),
            JoypadState::DualJoypad { controller } => {
                (controller >> player_shift(player)) as u8 & button.controller_bit() != 0
            }
        }
    }

    /// The held buttons of one player, in the order they were pressed on the handheld and in
    /// button order on the dual joypad.
    pub fn held(&self, player: usize) -> Vec<Button> {
        match self {
            JoypadState::Handheld { held } if player == 0 => held.iter().copied().collect(),
            JoypadState::Handheld { .. } => Vec::new(),
            JoypadState::DualJoypad { .. } => Button::ALL
                .into_iter()
                .filter(|button| self.is_held(*button, player))
                .collect(),
        }
    }

    /// Draws a controller for every joypad of the console along the bottom of the frame. Player
    /// one sits at the bottom-left; player two at the bottom-right.
    pub fn draw_hud(&self, frame: &mut Frame) {
        let (width, height) = (frame.width() as i64, frame.height() as i64);
        let base_y = height - 20;
        draw_controller(frame, 10, base_y, |button| self.is_held(button, 0));
        if let JoypadState::DualJoypad { .. } = self {
            draw_controller(frame, width - 100, base_y, |button| self.is_held(button, 1));
        }
    }
}

fn player_shift(player: usize) -> u32 {
    if player == 1 {
        8
    } else {
        0
    }
}

const UNIT: i64 = 6;
const OUTLINE: [u8; 4] = [0, 100, 200, 180];
const ACTIVE: [u8; 4] = [0, 150, 255, 220];
const IDLE: [u8; 4] = [0, 0, 0, 40];

enum Shape {
    Rect,
    Ellipse,
}

/// The layout of one controller, in units, relative to its top-left corner.
const LAYOUT: [(Button, Shape, [i64; 4]); 8] = [
    (Button::Up, Shape::Rect, [1, 0, 2, 1]),
    (Button::Down, Shape::Rect, [1, 2, 2, 3]),
    (Button::Left, Shape::Rect, [0, 1, 1, 2]),
    (Button::Right, Shape::Rect, [2, 1, 3, 2]),
    (Button::Select, Shape::Rect, [5, 1, 6, 2]),
    (Button::Start, Shape::Rect, [7, 1, 8, 2]),
    (Button::B, Shape::Ellipse, [10, 1, 11, 2]),
    (Button::A, Shape::Ellipse, [12, 1, 13, 2]),
];

fn draw_controller(frame: &mut Frame, base_x: i64, base_y: i64, is_held: impl Fn(Button) -> bool) {
    for (button, shape, [x0, y0, x1, y1]) in &LAYOUT {
        let rect: Rect = [
            base_x + x0 * UNIT,
            base_y + y0 * UNIT,
            base_x + x1 * UNIT,
            base_y + y1 * UNIT,
        ];
        let paint = Paint {
            fill: if is_held(*button) { ACTIVE } else { IDLE },
            outline: OUTLINE,
        };
        match shape {
            Shape::Rect => frame.draw_rect(rect, paint),
            Shape::Ellipse => frame.draw_ellipse(rect, paint),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(button: Button, player: usize) -> JoypadPress {
        JoypadPress { button, player }
    }

    #[test]
    fn tokens_parse_case_insensitively() {
        assert_eq!("Frame 30".parse(), Ok(JoypadToken::Advance(30)));
        assert_eq!(" UP ".parse(), Ok(JoypadToken::Button(Button::Up)));
        assert_eq!("select".parse(), Ok(JoypadToken::Button(Button::Select)));
        assert_eq!(
            "frame 2".parse::<JoypadToken>(),
            Err(SessionError::UnknownButton {
                token: "frame 2".into()
            })
        );
        assert_eq!(JoypadToken::Advance(10).split(0), (None, 10));
        assert_eq!(JoypadToken::Button(Button::A).split(1), (Some(press(Button::A, 1)), 1));
    }

    #[test]
    fn handheld_pairs_are_exclusive() {
        let mut state = JoypadState::new(Console::Handheld);
        assert_eq!(state.press(press(Button::Up, 0)), vec![InputEvent::Press(Button::Up)]);
        assert_eq!(
            state.press(press(Button::Down, 0)),
            vec![InputEvent::Release(Button::Up), InputEvent::Press(Button::Down)]
        );
        assert_eq!(state.held(0), vec![Button::Down]);

        state.press(press(Button::A, 0));
        state.press(press(Button::Left, 0));
        state.press(press(Button::Right, 0));
        assert_eq!(state.held(0), vec![Button::Down, Button::A, Button::Right]);
    }

    #[test]
    fn handheld_repress_is_a_rehold() {
        let mut state = JoypadState::new(Console::Handheld);
        state.press(press(Button::B, 0));
        state.press(press(Button::Up, 0));
        assert_eq!(state.press(press(Button::B, 0)), vec![InputEvent::Press(Button::B)]);
        assert_eq!(state.held(0), vec![Button::B, Button::Up]);
        assert!(state.is_held(Button::B, 0));
        assert!(!state.is_held(Button::B, 1));
    }

    #[test]
    fn dual_joypad_toggles_bits_per_player() {
        let mut state = JoypadState::new(Console::DualJoypad);
        assert_eq!(state.press(press(Button::A, 0)), vec![InputEvent::Controller(0x0080)]);
        assert_eq!(state.press(press(Button::Up, 1)), vec![InputEvent::Controller(0x0880)]);
        assert_eq!(state.held(0), vec![Button::A]);
        assert_eq!(state.held(1), vec![Button::Up]);
        // A second press lets go of the button
        assert_eq!(state.press(press(Button::A, 0)), vec![InputEvent::Controller(0x0800)]);
        assert!(!state.is_held(Button::A, 0));
        assert!(state.is_held(Button::Up, 1));
    }

    #[test]
    fn hud_marks_held_buttons() {
        let mut state = JoypadState::new(Console::Handheld);
        state.press(press(Button::Up, 0));
        let mut frame = Frame::filled(160, 144, [255; 4]);
        state.draw_hud(&mut frame);
        // The inside of the up and down buttons of the d-pad
        assert_eq!(frame.pixel(10 + 9, 124 + 3), Some(ACTIVE));
        assert_eq!(frame.pixel(10 + 9, 124 + 15), Some(IDLE));
        assert_eq!(frame.pixel(10 + 6, 124), Some(OUTLINE));
        assert_eq!(frame.pixel(0, 0), Some([255; 4]));
    }

    #[test]
    fn dual_hud_draws_both_players() {
        let mut state = JoypadState::new(Console::DualJoypad);
        state.press(press(Button::Left, 1));
        let mut frame = Frame::filled(256, 240, [255; 4]);
        state.draw_hud(&mut frame);
        assert_eq!(frame.pixel(10 + 3, 220 + 9), Some(IDLE));
        assert_eq!(frame.pixel(156 + 3, 220 + 9), Some(ACTIVE));
    }
}
