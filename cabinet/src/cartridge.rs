//! The records the engine reads and writes through the storage collaborator: users, their
//! cartridges, and the console families those cartridges run on.

use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::SessionError;

/// Users are identified by the chat platform's numeric id.
pub type UserId = u64;

/// The console families the engine knows how to drive. The family is picked once, when the
/// cartridge is checked in, and travels with the cartridge from then on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "kebab-case")]
pub enum Console {
    /// A single-joypad handheld with a 160x144 screen.
    #[display("handheld")]
    Handheld,
    /// A home console with two joypads sharing one controller word.
    #[display("dual-joypad")]
    DualJoypad,
}

impl Console {
    pub const ALL: [Console; 2] = [Console::Handheld, Console::DualJoypad];

    /// The number of users that can hold a joypad at the same time.
    pub const fn max_players(self) -> usize {
        match self {
            Console::Handheld => 1,
            Console::DualJoypad => 2,
        }
    }

    /// The (width, height) of the frames produced by the console's core.
    pub const fn screen_size(self) -> (u32, u32) {
        match self {
            Console::Handheld => (160, 144),
            Console::DualJoypad => (256, 240),
        }
    }

    /// How many ticks the boot intro lasts. When a core reports that it sits at its boot vector,
    /// these ticks are skipped (and replaced by the boot animation, if there is one).
    pub const fn boot_ticks(self) -> u32 {
        match self {
            Console::Handheld => 127,
            Console::DualJoypad => 0,
        }
    }
}

impl FromStr for Console {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "handheld" => Ok(Console::Handheld),
            "dual-joypad" => Ok(Console::DualJoypad),
            _ => Err(SessionError::ConsoleNotValid),
        }
    }
}

/// The stable identity of a cartridge, used as the cache key. (owner, console, title) is unique,
/// so the key survives the cartridge being reloaded from storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CartridgeKey {
    pub owner: UserId,
    pub console: Console,
    pub title: String,
}

impl CartridgeKey {
    pub fn new(owner: UserId, console: Console, title: impl Into<String>) -> Self {
        Self {
            owner,
            console,
            title: title.into(),
        }
    }
}

/// A user-owned piece of game media plus the runtime state persisted for it.
///
/// `state` is the working snapshot that is rewritten after every interaction, while
/// `save_state` is the checkpoint that only changes when the user asks for it.
#[derive(Clone, PartialEq, Eq)]
pub struct Cartridge {
    pub owner: UserId,
    pub console: Console,
    pub title: String,
    rom: Arc<[u8]>,
    rom_hash: String,
    pub state: Option<Vec<u8>>,
    pub save_state: Option<Vec<u8>>,
    /// The number of frames that have been played on this cartridge.
    pub play_time: u64,
    /// The decorative border asset, relative to the cartridge's asset directory.
    pub border: Option<String>,
    /// The boot animation asset, relative to the console's asset directory.
    pub boot_animation: Option<String>,
}

impl Cartridge {
    pub fn new(owner: UserId, console: Console, title: impl Into<String>, rom: impl Into<Arc<[u8]>>) -> Self {
        let rom = rom.into();
        let rom_hash = Self::rom_hash_of(&rom);
        let (border, boot_animation) = match console {
            Console::Handheld => (Some("border.png".to_owned()), Some("boot.gif".to_owned())),
            Console::DualJoypad => (None, None),
        };
        Self {
            owner,
            console,
            title: title.into(),
            rom,
            rom_hash,
            state: None,
            save_state: None,
            play_time: 0,
            border,
            boot_animation,
        }
    }

    /// The hex-encoded SHA-256 digest of a ROM image.
    pub fn rom_hash_of(rom: &[u8]) -> String {
        hex::encode(Sha256::digest(rom))
    }

    pub fn key(&self) -> CartridgeKey {
        CartridgeKey::new(self.owner, self.console, self.title.clone())
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    pub fn rom_hash(&self) -> &str {
        &self.rom_hash
    }
}

impl Debug for Cartridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cartridge")
            .field("owner", &self.owner)
            .field("console", &self.console)
            .field("title", &self.title)
            .field("rom_hash", &self.rom_hash)
            .field("state", &self.state.as_ref().map(Vec::len))
            .field("save_state", &self.save_state.as_ref().map(Vec::len))
            .field("play_time", &self.play_time)
            .finish_non_exhaustive()
    }
}

/// A player as seen by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Premium users unlock colour and borders on the handheld.
    #[serde(default)]
    pub premium: bool,
    #[serde(default)]
    pub profile: HandheldProfile,
}

impl User {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

/// Per-user display preferences for the handheld.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandheldProfile {
    pub enable_color: bool,
    pub enable_border: bool,
    /// A border uploaded by the user, relative to their handheld asset directory. When set, it
    /// replaces the cartridge's own border.
    pub custom_border: Option<String>,
}

impl Default for HandheldProfile {
    fn default() -> Self {
        Self {
            enable_color: true,
            enable_border: true,
            custom_border: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_names_round_trip() {
        for console in Console::ALL {
            assert_eq!(console.to_string().parse::<Console>(), Ok(console));
        }
        assert_eq!("  Handheld ".parse::<Console>(), Ok(Console::Handheld));
        assert_eq!("game-cube".parse::<Console>(), Err(SessionError::ConsoleNotValid));
    }

    #[test]
    fn rom_hash_is_content_derived() {
        let first = Cartridge::new(1, Console::Handheld, "Snake", vec![1, 2, 3]);
        let renamed = Cartridge::new(1, Console::Handheld, "Not Snake", vec![1, 2, 3]);
        let other = Cartridge::new(1, Console::Handheld, "Snake", vec![3, 2, 1]);
        assert_eq!(first.rom_hash(), renamed.rom_hash());
        assert_ne!(first.rom_hash(), other.rom_hash());
        assert_eq!(first.rom_hash().len(), 64);
        // SHA-256 of the empty string
        assert_eq!(
            Cartridge::rom_hash_of(&[]),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn key_ignores_runtime_state() {
        let mut cart = Cartridge::new(7, Console::DualJoypad, "Duck Hunt", vec![0; 16]);
        let key = cart.key();
        cart.state = Some(vec![1, 2, 3]);
        cart.play_time = 99;
        assert_eq!(cart.key(), key);
        assert_eq!(key, CartridgeKey::new(7, Console::DualJoypad, "Duck Hunt"));
    }

    #[test]
    fn handheld_cartridges_carry_default_assets() {
        let cart = Cartridge::new(7, Console::Handheld, "Snake", vec![0; 16]);
        assert_eq!(cart.border.as_deref(), Some("border.png"));
        assert_eq!(cart.boot_animation.as_deref(), Some("boot.gif"));
        let cart = Cartridge::new(7, Console::DualJoypad, "Duck Hunt", vec![0; 16]);
        assert!(cart.border.is_none());
    }
}
