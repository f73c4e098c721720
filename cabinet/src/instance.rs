use heapless::Deque;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::trace;

use crate::joypad::JoypadPress;
use crate::joypad::JoypadState;
use crate::Console;
use crate::CoreError;
use crate::EmulatorCore;
use crate::Frame;
use crate::InputEvent;
use crate::SessionError;

/// How many pre-input snapshots are kept for rewinding.
pub const REWIND_DEPTH: usize = 10;

/// A bounded history of snapshots, most recent last. Once full, every push drops the oldest
/// entry.
#[derive(Debug, Default)]
pub struct RewindStack {
    entries: Deque<Vec<u8>, REWIND_DEPTH>,
}

impl RewindStack {
    pub fn push(&mut self, snapshot: Vec<u8>) {
        if self.entries.is_full() {
            self.entries.pop_front();
        }
        // There is room now, so this can not hand the snapshot back
        let _ = self.entries.push_back(snapshot);
    }

    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.entries.pop_back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates from the oldest to the most recent snapshot.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.iter().map(Vec::as_slice)
    }
}

/// The bytes behind every stored state: the core's own state plus the buttons held on its
/// joypads. The core latches held buttons too, so both halves have to travel together or the
/// next press lands on the wrong held set.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    core: Vec<u8>,
    joypad: JoypadState,
}

fn unreadable(err: postcard::Error) -> CoreError {
    CoreError::new(format!("unreadable snapshot: {err}"))
}

/// One live emulation core bound to one cartridge, plus its rewind history.
pub struct GameInstance {
    console: Console,
    core: Box<dyn EmulatorCore>,
    cold_boot: Vec<u8>,
    history: RewindStack,
    joypad: JoypadState,
    boot_animation: Vec<Frame>,
    ticks_per_frame: u32,
}

impl GameInstance {
    /// Loads the ROM into the core and captures the cold-boot snapshot that [`restart`] returns
    /// to.
    ///
    /// [`restart`]: GameInstance::restart
    pub fn new(
        console: Console,
        mut core: Box<dyn EmulatorCore>,
        rom: &[u8],
        boot_animation: Vec<Frame>,
        ticks_per_frame: u32,
    ) -> Result<Self, CoreError> {
        core.load_rom(rom)?;
        let cold_boot = core.serialize_state()?;
        debug!("Booted a {console} core, cold-boot snapshot is {} bytes", cold_boot.len());
        Ok(Self {
            console,
            core,
            cold_boot,
            history: RewindStack::default(),
            joypad: JoypadState::new(console),
            boot_animation,
            ticks_per_frame: ticks_per_frame.max(1),
        })
    }

    pub fn console(&self) -> Console {
        self.console
    }

    pub fn max_players(&self) -> usize {
        self.console.max_players()
    }

    /// Returns the core to its cold-boot state with nothing held. The history is left alone.
    pub fn restart(&mut self) -> Result<(), SessionError> {
        self.core.deserialize_state(&self.cold_boot)?;
        self.joypad = JoypadState::new(self.console);
        Ok(())
    }

    /// Pops the most recent snapshot off of the rewind stack and loads it. Popped snapshots are
    /// gone for good.
    pub fn previous_state(&mut self) -> Result<(), SessionError> {
        let snapshot = self.history.pop().ok_or(SessionError::NoPreviousState)?;
        self.load_state(&snapshot)
    }

    pub fn push_history(&mut self, snapshot: Vec<u8>) {
        self.history.push(snapshot);
    }

    pub fn history(&self) -> &RewindStack {
        &self.history
    }

    /// Serializes the core together with the held buttons.
    pub fn capture_state(&self) -> Result<Vec<u8>, SessionError> {
        let snapshot = Snapshot {
            core: self.core.serialize_state()?,
            joypad: self.joypad.clone(),
        };
        Ok(postcard::to_allocvec(&snapshot).map_err(unreadable)?)
    }

    /// Loads a state produced by [`capture_state`], restoring the held buttons along with the
    /// core.
    ///
    /// [`capture_state`]: GameInstance::capture_state
    pub fn load_state(&mut self, state: &[u8]) -> Result<(), SessionError> {
        let snapshot: Snapshot = postcard::from_bytes(state).map_err(unreadable)?;
        if snapshot.joypad.console() != self.console {
            return Err(SessionError::ConsoleNotValid);
        }
        self.core.deserialize_state(&snapshot.core)?;
        self.joypad = snapshot.joypad;
        Ok(())
    }

    /// The current screen. A core that renders nothing, or an empty picture, has no frame data.
    pub fn screenshot(&mut self) -> Result<Frame, SessionError> {
        self.core
            .render_frame()
            .filter(|frame| !frame.is_empty())
            .ok_or(SessionError::InvalidFrameData)
    }

    pub fn joypad(&self) -> &JoypadState {
        &self.joypad
    }

    /// Runs the game for `frame_count` frames after applying `press`, returning every rendered
    /// frame. A core that has not left its boot vector yet first plays through the boot intro,
    /// whose frames (if there is a boot animation) lead the returned sequence.
    pub fn advance(&mut self, press: Option<JoypadPress>, frame_count: u32) -> Result<Vec<Frame>, SessionError> {
        let mut frames = Vec::with_capacity(frame_count as usize);
        if self.core.is_at_boot() {
            frames.extend(self.boot_animation.iter().cloned());
            let boot_ticks = self.console.boot_ticks();
            if boot_ticks > 0 {
                trace!("Skipping {boot_ticks} ticks of boot intro");
                self.core.tick(boot_ticks)?;
            }
        }
        if let Some(press) = press {
            for event in self.joypad.press(press) {
                self.send_input(event);
            }
        }
        for _ in 0..frame_count {
            self.core.tick(self.ticks_per_frame)?;
            // Cores may skip a frame mid-transition; only the frames they do produce are kept
            if let Some(frame) = self.core.render_frame().filter(|frame| !frame.is_empty()) {
                frames.push(frame);
            }
        }
        Ok(frames)
    }

    fn send_input(&mut self, event: InputEvent) {
        trace!("Sending {event:?} to the {} core", self.console);
        self.core.send_input(event);
    }

    /// Releases the core. The instance is not used afterwards.
    pub fn stop(&mut self) -> Result<(), CoreError> {
        debug!("Stopping a {} core", self.console);
        self.core.stop()
    }
}

impl std::fmt::Debug for GameInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameInstance")
            .field("console", &self.console)
            .field("history", &self.history.len())
            .field("joypad", &self.joypad)
            .finish_non_exhaustive()
    }
}
