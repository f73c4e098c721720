//! Cabinet is the engine behind shared arcade sessions. It keeps at most one running emulation
//! core per cartridge, decides who may press the buttons of each one, remembers the last few
//! moves so that they can be undone, and quietly reclaims sessions that nobody has touched in a
//! while.
//!
//! The engine never stores anything durably. Every interaction starts from the state stored on
//! the [`Cartridge`] and hands the new state back, so a reclaimed session can always be rebuilt
//! from what the caller persisted. Likewise, it never emulates any hardware itself; real cores
//! plug in through [`EmulatorCore`].

mod assets;
mod cartridge;
mod config;
pub mod emulation;
mod emulator;
mod error;
pub mod frame;
mod instance;
pub mod joypad;
mod manager;

pub use assets::AssetStore;
pub use cartridge::Cartridge;
pub use cartridge::CartridgeKey;
pub use cartridge::Console;
pub use cartridge::HandheldProfile;
pub use cartridge::User;
pub use cartridge::UserId;
pub use config::EngineConfig;
pub use emulation::Button;
pub use emulation::CoreFactory;
pub use emulation::EmulatorCore;
pub use emulation::InputEvent;
pub use emulator::ConsoleEmulator;
pub use emulator::FrameStyle;
pub use error::CoreError;
pub use error::SessionError;
pub use frame::pipeline::Media;
pub use frame::Frame;
pub use instance::GameInstance;
pub use instance::RewindStack;
pub use instance::REWIND_DEPTH;
pub use joypad::JoypadToken;
pub use manager::InstanceManager;
pub use manager::SessionHandle;
