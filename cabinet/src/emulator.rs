//! The console emulators sit between the session commands and the instance manager. They make sure
//! every interaction starts from the cartridge's stored state, run the game, decorate the frames
//! for their console family, and hand the new state back to the caller for persisting.

use std::sync::Arc;

use tracing::debug;

use crate::frame::pipeline;
use crate::frame::pipeline::Media;
use crate::joypad::JoypadState;
use crate::joypad::JoypadToken;
use crate::AssetStore;
use crate::Cartridge;
use crate::Console;
use crate::CoreFactory;
use crate::EngineConfig;
use crate::Frame;
use crate::InstanceManager;
use crate::SessionError;
use crate::SessionHandle;
use crate::User;
use crate::UserId;

/// Where the game screen goes inside of a handheld border, and how large it is drawn.
const BORDER_SCREEN_ORIGIN: (i64, i64) = (48, 40);
const BORDER_SCREEN_SIZE: (u32, u32) = (161, 144);

/// How handheld frames are decorated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameStyle {
    pub color: bool,
    /// The border asset, relative to the asset root.
    pub border: Option<String>,
}

impl Default for FrameStyle {
    fn default() -> Self {
        Self {
            color: true,
            border: None,
        }
    }
}

impl FrameStyle {
    /// Resolves the style from the cartridge owner's profile. Colour and borders are premium
    /// features; everyone else plays in greyscale without a border.
    pub fn for_owner(owner: &User, cartridge: &Cartridge) -> Self {
        if !owner.premium {
            return Self {
                color: false,
                border: None,
            };
        }
        let profile = &owner.profile;
        let border = profile.enable_border.then(|| match &profile.custom_border {
            Some(custom) => Some(format!("{}/{}/{custom}", owner.id, Console::Handheld)),
            None => cartridge
                .border
                .as_ref()
                .map(|border| format!("{}/{}/{}/{border}", owner.id, Console::Handheld, cartridge.title)),
        });
        Self {
            color: profile.enable_color,
            border: border.flatten(),
        }
    }
}

/// Drives the sessions of one console family.
pub struct ConsoleEmulator {
    manager: InstanceManager,
}

impl ConsoleEmulator {
    pub fn new(manager: InstanceManager) -> Self {
        Self { manager }
    }

    /// Creates the emulator and its instance manager. Assets are loaded from the configured asset
    /// directory.
    pub fn launch(console: Console, factory: impl CoreFactory + 'static, config: EngineConfig) -> Self {
        let assets = Arc::new(AssetStore::new(config.assets_dir.clone()));
        Self::new(InstanceManager::launch(console, factory, assets, config))
    }

    pub fn console(&self) -> Console {
        self.manager.console()
    }

    pub fn manager(&self) -> &InstanceManager {
        &self.manager
    }

    /// Resumes the cartridge (or boots it, if it was never played) and shows the current screen.
    pub fn start(
        &self,
        cartridge: &Cartridge,
        user: UserId,
        style: &FrameStyle,
    ) -> Result<(SessionHandle, Frame), SessionError> {
        self.check_console(cartridge)?;
        let (session, _) = self.manager.get_or_create(cartridge, user)?;
        let frame = session.with_game(|game| {
            match &cartridge.state {
                Some(state) => game.load_state(state)?,
                None => game.restart()?,
            }
            let frame = game.screenshot()?;
            Ok(self.decorate(vec![frame], game.joypad(), style))
        })?;
        let frame = frame.into_iter().next().ok_or(SessionError::InvalidFrameData)?;
        Ok((session, frame))
    }

    /// Applies a joypad token on behalf of `user` and returns the frames that were played. The
    /// state before the input goes onto the rewind stack, and the cartridge's working state and
    /// play time are updated; persisting them is up to the caller.
    pub fn input(
        &self,
        cartridge: &mut Cartridge,
        user: UserId,
        token: &str,
        style: &FrameStyle,
    ) -> Result<(SessionHandle, Vec<Frame>), SessionError> {
        self.check_console(cartridge)?;
        let (session, player) = self.manager.get_or_create(cartridge, user)?;
        let token: JoypadToken = token.parse()?;
        let (press, frame_count) = token.split(player);
        debug!("Player {player} of '{}' sent {token:?}", cartridge.title);
        let (frames, state) = session.with_game(|game| {
            match &cartridge.state {
                Some(state) => game.load_state(state)?,
                None => game.restart()?,
            }
            game.push_history(game.capture_state()?);
            let frames = game.advance(press, frame_count)?;
            if frames.is_empty() {
                return Err(SessionError::InvalidFrameData);
            }
            let frames = self.decorate(frames, game.joypad(), style);
            Ok((frames, game.capture_state()?))
        })?;
        cartridge.state = Some(state);
        cartridge.play_time += frames.len() as u64;
        Ok((session, frames))
    }

    /// Returns the cartridge to its cold-boot state and shows the first screen.
    pub fn restart(
        &self,
        cartridge: &mut Cartridge,
        user: UserId,
        style: &FrameStyle,
    ) -> Result<(SessionHandle, Frame), SessionError> {
        self.check_console(cartridge)?;
        let (session, _) = self.manager.get_or_create(cartridge, user)?;
        let state = session.with_game(|game| {
            game.restart()?;
            game.capture_state()
        })?;
        cartridge.state = Some(state);
        self.start(cartridge, user, style)
    }

    /// Undoes the most recent input of the running session.
    pub fn rewind(
        &self,
        cartridge: &mut Cartridge,
        user: UserId,
        style: &FrameStyle,
    ) -> Result<(SessionHandle, Frame), SessionError> {
        self.check_console(cartridge)?;
        let (session, _) = self.manager.get_or_create(cartridge, user)?;
        let state = session.with_game(|game| {
            game.previous_state()?;
            game.capture_state()
        })?;
        cartridge.state = Some(state);
        self.start(cartridge, user, style)
    }

    /// Encodes frames for transport at the configured animation rate.
    pub fn encode(&self, frames: &[Frame]) -> Result<Media, SessionError> {
        pipeline::encode(frames, self.manager.config().gif_fps)
    }

    fn check_console(&self, cartridge: &Cartridge) -> Result<(), SessionError> {
        if cartridge.console == self.console() {
            Ok(())
        } else {
            Err(SessionError::ConsoleNotValid)
        }
    }

    fn decorate(&self, frames: Vec<Frame>, joypad: &JoypadState, style: &FrameStyle) -> Vec<Frame> {
        match self.console() {
            Console::Handheld => {
                let border = style.border.as_ref().and_then(|path| self.manager.assets().image(path));
                frames
                    .into_iter()
                    .map(|frame| {
                        let frame = match &border {
                            Some(border) => framed(border, &frame),
                            None => frame,
                        };
                        let mut frame = if style.color { frame } else { frame.greyscale() };
                        joypad.draw_hud(&mut frame);
                        frame
                    })
                    .collect()
            }
            Console::DualJoypad => frames
                .into_iter()
                .map(|mut frame| {
                    joypad.draw_hud(&mut frame);
                    frame
                })
                .collect(),
        }
    }
}

/// Draws the game screen inside of a border image.
fn framed(border: &Frame, screen: &Frame) -> Frame {
    let mut canvas = border.clone();
    let (width, height) = BORDER_SCREEN_SIZE;
    let (x, y) = BORDER_SCREEN_ORIGIN;
    canvas.paste_masked(&screen.resized(width, height), x, y);
    canvas
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::emulation::scripted::ScriptedCore;
    use crate::Button;

    const OWNER: UserId = 10;

    fn emulator(console: Console, assets_dir: PathBuf) -> ConsoleEmulator {
        let config = EngineConfig {
            assets_dir,
            ..EngineConfig::default()
        };
        ConsoleEmulator::launch(console, ScriptedCore::factory(console), config)
    }

    fn handheld() -> (ConsoleEmulator, Cartridge) {
        let emulator = emulator(Console::Handheld, PathBuf::from("/nonexistent"));
        let cart = Cartridge::new(OWNER, Console::Handheld, "Snake", b"snake".to_vec());
        (emulator, cart)
    }

    fn is_grey(frame: &Frame) -> bool {
        frame.pixels().chunks_exact(4).all(|px| px[0] == px[1] && px[1] == px[2])
    }

    #[test]
    fn premium_owners_get_their_profile() {
        let cart = Cartridge::new(OWNER, Console::Handheld, "Snake", b"snake".to_vec());
        let mut owner = User::new(OWNER);
        assert_eq!(
            FrameStyle::for_owner(&owner, &cart),
            FrameStyle {
                color: false,
                border: None
            }
        );
        owner.premium = true;
        let style = FrameStyle::for_owner(&owner, &cart);
        assert!(style.color);
        assert_eq!(style.border.as_deref(), Some("10/handheld/Snake/border.png"));
        owner.profile.custom_border = Some("mine.png".into());
        let style = FrameStyle::for_owner(&owner, &cart);
        assert_eq!(style.border.as_deref(), Some("10/handheld/mine.png"));
        owner.profile.enable_border = false;
        owner.profile.enable_color = false;
        assert_eq!(FrameStyle::for_owner(&owner, &cart).border, None);
    }

    #[test]
    fn start_shows_the_stored_state() {
        let (emulator, mut cart) = handheld();
        let style = FrameStyle::default();
        emulator.input(&mut cart, OWNER, "frame 30", &style).unwrap();
        let (_, resumed) = emulator.start(&cart, OWNER, &style).unwrap();
        emulator.manager().stop(&cart.key()).unwrap();
        let (_, cold) = emulator.start(&cart, OWNER, &style).unwrap();
        assert_eq!(resumed, cold);
        cart.state = None;
        let (_, booted) = emulator.start(&cart, OWNER, &style).unwrap();
        assert_ne!(booted, resumed);
    }

    #[test]
    fn input_updates_the_cartridge() {
        let (emulator, mut cart) = handheld();
        let style = FrameStyle::default();
        let (session, frames) = emulator.input(&mut cart, OWNER, "frame 10", &style).unwrap();
        assert_eq!(frames.len(), 10);
        assert_eq!(cart.play_time, 10);
        let state = cart.state.clone().unwrap();
        let (_, frames) = emulator.input(&mut cart, OWNER, "a", &style).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(cart.play_time, 11);
        assert_ne!(cart.state.as_ref(), Some(&state));
        let history: Vec<Vec<u8>> = session
            .with_game(|game| Ok(game.history().iter().map(<[u8]>::to_vec).collect()))
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1], state);
    }

    #[test]
    fn unknown_tokens_change_nothing() {
        let (emulator, mut cart) = handheld();
        let style = FrameStyle::default();
        let err = emulator.input(&mut cart, OWNER, "jump", &style).unwrap_err();
        assert_eq!(err, SessionError::UnknownButton { token: "jump".into() });
        assert!(cart.state.is_none());
        assert_eq!(cart.play_time, 0);
    }

    #[test]
    fn opposite_directions_release_each_other() {
        let (emulator, mut cart) = handheld();
        let style = FrameStyle::default();
        emulator.input(&mut cart, OWNER, "up", &style).unwrap();
        let (session, _) = emulator.input(&mut cart, OWNER, "down", &style).unwrap();
        let held = session.with_game(|game| Ok(game.joypad().held(0))).unwrap();
        assert_eq!(held, vec![Button::Down]);
    }

    #[test]
    fn rewind_returns_to_the_state_before_the_input() {
        let (emulator, mut cart) = handheld();
        let style = FrameStyle::default();
        emulator.input(&mut cart, OWNER, "frame 10", &style).unwrap();
        let (_, before) = emulator.start(&cart, OWNER, &style).unwrap();
        let state = cart.state.clone();
        emulator.input(&mut cart, OWNER, "frame 60", &style).unwrap();
        let (_, rewound) = emulator.rewind(&mut cart, OWNER, &style).unwrap();
        assert_eq!(rewound, before);
        assert_eq!(cart.state, state);
    }

    #[test]
    fn restart_goes_back_to_cold_boot() {
        let (emulator, mut cart) = handheld();
        let style = FrameStyle::default();
        let (_, booted) = emulator.start(&cart, OWNER, &style).unwrap();
        emulator.input(&mut cart, OWNER, "frame 60", &style).unwrap();
        let (_, restarted) = emulator.restart(&mut cart, OWNER, &style).unwrap();
        assert_eq!(restarted, booted);
    }

    #[test]
    fn greyscale_unless_colour_is_enabled() {
        let (emulator, mut cart) = handheld();
        let grey = FrameStyle {
            color: false,
            border: None,
        };
        let (_, frames) = emulator.input(&mut cart, OWNER, "frame 1", &grey).unwrap();
        let mut screen = frames[0].clone();
        // Blank out the HUD, which is drawn in colour on top
        for y in 100..144 {
            for x in 0..160 {
                screen.put_pixel(x, y, [0, 0, 0, 255]);
            }
        }
        assert!(is_grey(&screen));
        let (_, colour) = emulator.start(&cart, OWNER, &FrameStyle::default()).unwrap();
        assert!(!is_grey(&colour));
    }

    #[test]
    fn borders_frame_the_screen() {
        let dir = std::env::temp_dir().join(format!("cabinet-border-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("10/handheld/Snake")).unwrap();
        let border = Frame::filled(256, 224, [200, 10, 10, 255]);
        std::fs::write(dir.join("10/handheld/Snake/border.png"), pipeline::encode_png(&border).unwrap()).unwrap();
        let emulator = emulator(Console::Handheld, dir);
        let cart = Cartridge::new(OWNER, Console::Handheld, "Snake", b"snake".to_vec());
        let style = FrameStyle {
            color: true,
            border: Some("10/handheld/Snake/border.png".into()),
        };
        let (_, frame) = emulator.start(&cart, OWNER, &style).unwrap();
        assert_eq!(frame.size(), (256, 224));
        assert_eq!(frame.pixel(0, 0), Some([200, 10, 10, 255]));
        assert_ne!(frame.pixel(100, 60), Some([200, 10, 10, 255]));
        // A missing border is skipped
        let style = FrameStyle {
            color: true,
            border: Some("10/handheld/Snake/gone.png".into()),
        };
        let (_, frame) = emulator.start(&cart, OWNER, &style).unwrap();
        assert_eq!(frame.size(), (160, 144));
        // So is one that climbs out of the owner's directory
        let style = FrameStyle {
            color: true,
            border: Some("10/handheld/../../10/handheld/Snake/border.png".into()),
        };
        let (_, frame) = emulator.start(&cart, OWNER, &style).unwrap();
        assert_eq!(frame.size(), (160, 144));
    }

    #[test]
    fn dual_joypad_shows_both_players() {
        let emulator = emulator(Console::DualJoypad, PathBuf::from("/nonexistent"));
        let mut cart = Cartridge::new(OWNER, Console::DualJoypad, "Duck Hunt", b"duck".to_vec());
        let style = FrameStyle::default();
        emulator.start(&cart, OWNER, &style).unwrap();
        emulator.manager().add_user(&cart.key(), 11).unwrap();
        emulator.input(&mut cart, OWNER, "a", &style).unwrap();
        let (session, frames) = emulator.input(&mut cart, 11, "up", &style).unwrap();
        assert_eq!(frames[0].size(), (256, 240));
        let held = session
            .with_game(|game| Ok((game.joypad().held(0), game.joypad().held(1))))
            .unwrap();
        assert_eq!(held, (vec![Button::A], vec![Button::Up]));
    }

    #[test]
    fn wrong_family_is_rejected() {
        let (emulator, _) = handheld();
        let mut cart = Cartridge::new(OWNER, Console::DualJoypad, "Duck Hunt", b"duck".to_vec());
        let style = FrameStyle::default();
        assert_eq!(emulator.start(&cart, OWNER, &style).unwrap_err(), SessionError::ConsoleNotValid);
        assert_eq!(
            emulator.input(&mut cart, OWNER, "a", &style).unwrap_err(),
            SessionError::ConsoleNotValid
        );
    }

    #[test]
    fn blank_screens_are_invalid_frame_data() {
        let factory = || -> Result<Box<dyn crate::EmulatorCore>, crate::CoreError> {
            Ok(Box::new(ScriptedCore::new(Console::Handheld).blank()))
        };
        let emulator = ConsoleEmulator::launch(Console::Handheld, factory, EngineConfig::default());
        let mut cart = Cartridge::new(OWNER, Console::Handheld, "Snake", b"snake".to_vec());
        let style = FrameStyle::default();
        assert_eq!(emulator.start(&cart, OWNER, &style).unwrap_err(), SessionError::InvalidFrameData);
        assert_eq!(
            emulator.input(&mut cart, OWNER, "frame 10", &style).unwrap_err(),
            SessionError::InvalidFrameData
        );
    }

    #[test]
    fn encoding_follows_frame_count() {
        let (emulator, mut cart) = handheld();
        let style = FrameStyle::default();
        let (_, frame) = emulator.start(&cart, OWNER, &style).unwrap();
        assert!(matches!(emulator.encode(&[frame]), Ok(Media::Png(_))));
        let (_, frames) = emulator.input(&mut cart, OWNER, "frame 10", &style).unwrap();
        assert!(matches!(emulator.encode(&frames), Ok(Media::Gif(_))));
    }
}
