use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use cabinet::Cartridge;
use cabinet::CartridgeKey;
use cabinet::Console;
use cabinet::ConsoleEmulator;
use cabinet::CoreFactory;
use cabinet::EngineConfig;
use cabinet::Frame;
use cabinet::FrameStyle;
use cabinet::Media;
use cabinet::SessionError;
use cabinet::SessionHandle;
use cabinet::UserId;
use tracing::debug;
use tracing::info;

use crate::Vault;
use crate::VaultError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Every way a command can fail.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum CommandError {
    #[display("{_0}")]
    Session(SessionError),
    #[display("{_0}")]
    Vault(VaultError),
}

/// What a frame-producing command shows the players: the decorated frames and their encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screen {
    pub frames: Vec<Frame>,
    pub media: Media,
}

/// Routes the commands of every user to the right console emulator. A user is "playing" from the
/// moment they start one of their cartridges until they stop it or the session is reclaimed for
/// being idle, which is noticed the next time they act on it.
pub struct SessionCoordinator<V> {
    vault: V,
    handheld: ConsoleEmulator,
    dual_joypad: ConsoleEmulator,
    /// The cartridge each user is playing.
    sessions: Mutex<HashMap<UserId, CartridgeKey>>,
    /// Serializes the fetch, play and write-back of each cartridge. Only cartridges with a
    /// command in flight have an entry.
    turns: Mutex<HashMap<CartridgeKey, Arc<Mutex<()>>>>,
}

impl<V: Vault> SessionCoordinator<V> {
    pub fn new(vault: V, handheld: ConsoleEmulator, dual_joypad: ConsoleEmulator) -> Self {
        Self {
            vault,
            handheld,
            dual_joypad,
            sessions: Mutex::default(),
            turns: Mutex::default(),
        }
    }

    /// Creates both console emulators with the same configuration.
    pub fn launch(
        vault: V,
        handheld: impl CoreFactory + 'static,
        dual_joypad: impl CoreFactory + 'static,
        config: EngineConfig,
    ) -> Self {
        Self::new(
            vault,
            ConsoleEmulator::launch(Console::Handheld, handheld, config.clone()),
            ConsoleEmulator::launch(Console::DualJoypad, dual_joypad, config),
        )
    }

    pub fn vault(&self) -> &V {
        &self.vault
    }

    pub fn emulator(&self, console: Console) -> &ConsoleEmulator {
        match console {
            Console::Handheld => &self.handheld,
            Console::DualJoypad => &self.dual_joypad,
        }
    }

    /// Starts (or resumes) one of the user's cartridges, making it their active session.
    pub fn start_session(&self, user: UserId, console: Console, title: &str) -> Result<Screen, CommandError> {
        let record = self.vault.fetch_or_create_user(user)?;
        let cartridge = self.vault.fetch_cartridge(user, console, title)?;
        let key = cartridge.key();
        let emulator = self.emulator(console);
        let frame = self.with_turn(&key, || -> Result<Frame, CommandError> {
            let style = FrameStyle::for_owner(&record, &cartridge);
            let (_, frame) = emulator.start(&cartridge, user, &style)?;
            self.vault.update_user(user, &record)?;
            Ok(frame)
        })?;
        info!("{user} is now playing '{title}' on the {console}");
        lock(&self.sessions).insert(user, key);
        self.screen(emulator, vec![frame])
    }

    /// Presses a button (or fast forwards) on the session of `owner` on behalf of `user`. If the
    /// session was reclaimed, the owner's next input brings it back from the stored state.
    pub fn submit_input(&self, owner: UserId, user: UserId, token: &str) -> Result<Screen, CommandError> {
        let key = self.active_key(owner)?;
        self.submit(&key, user, token)
    }

    /// Presses a button on whichever running session `user` holds a joypad for, so invited
    /// players never have to name the cartridge. The user's own active session comes first.
    pub fn play(&self, user: UserId, token: &str) -> Result<Screen, CommandError> {
        let session = match self.live_session(user) {
            Ok((_, session)) => session,
            Err(_) => Console::ALL
                .into_iter()
                .find_map(|console| self.emulator(console).manager().lookup_by_user(user).ok())
                .ok_or(SessionError::SessionNotFound)?,
        };
        self.submit(session.key(), user, token)
    }

    /// Gives `guest` a joypad for the user's active session and returns which one.
    pub fn invite_user(&self, user: UserId, guest: UserId) -> Result<usize, CommandError> {
        let (key, _) = self.live_session(user)?;
        self.vault.fetch_or_create_user(guest)?;
        let player = self.emulator(key.console).manager().add_user(&key, guest)?;
        Ok(player)
    }

    pub fn remove_user(&self, user: UserId, guest: UserId) -> Result<(), CommandError> {
        let (key, _) = self.live_session(user)?;
        self.emulator(key.console).manager().remove_user(&key, guest)?;
        Ok(())
    }

    /// Returns the user's active session to its cold-boot state.
    pub fn restart_session(&self, user: UserId) -> Result<Screen, CommandError> {
        let (key, _) = self.live_session(user)?;
        let emulator = self.emulator(key.console);
        let frame = self.with_turn(&key, || -> Result<Frame, CommandError> {
            let (mut cartridge, style) = self.fetch(&key)?;
            let (_, frame) = emulator.restart(&mut cartridge, user, &style)?;
            self.vault.update_cartridge(&cartridge)?;
            Ok(frame)
        })?;
        self.screen(emulator, vec![frame])
    }

    /// Stores the current state of the user's active session as its checkpoint.
    pub fn save_checkpoint(&self, user: UserId) -> Result<(), CommandError> {
        let (key, session) = self.live_session(user)?;
        self.with_turn(&key, || -> Result<(), CommandError> {
            let (mut cartridge, _) = self.fetch(&key)?;
            cartridge.save_state = Some(session.with_game(|game| game.capture_state())?);
            self.vault.update_cartridge(&cartridge)?;
            Ok(())
        })?;
        debug!("Saved a checkpoint of '{}' for {user}", key.title);
        Ok(())
    }

    /// Replaces the working state of the user's active session with its checkpoint.
    pub fn load_checkpoint(&self, user: UserId) -> Result<Screen, CommandError> {
        let (key, _) = self.live_session(user)?;
        let emulator = self.emulator(key.console);
        let frame = self.with_turn(&key, || -> Result<Frame, CommandError> {
            let (mut cartridge, style) = self.fetch(&key)?;
            let checkpoint = cartridge.save_state.clone().ok_or(SessionError::NoSaveState)?;
            cartridge.state = Some(checkpoint);
            let (_, frame) = emulator.start(&cartridge, user, &style)?;
            self.vault.update_cartridge(&cartridge)?;
            Ok(frame)
        })?;
        self.screen(emulator, vec![frame])
    }

    /// Undoes the most recent input of the user's active session.
    pub fn rewind_one_step(&self, user: UserId) -> Result<Screen, CommandError> {
        let (key, _) = self.live_session(user)?;
        let emulator = self.emulator(key.console);
        let frame = self.with_turn(&key, || -> Result<Frame, CommandError> {
            let (mut cartridge, style) = self.fetch(&key)?;
            let (_, frame) = emulator.rewind(&mut cartridge, user, &style)?;
            self.vault.update_cartridge(&cartridge)?;
            Ok(frame)
        })?;
        self.screen(emulator, vec![frame])
    }

    /// Ends the user's active session and stops its instance.
    pub fn stop_session(&self, user: UserId) -> Result<(), CommandError> {
        let key = lock(&self.sessions)
            .remove(&user)
            .ok_or(SessionError::SessionNotFound)?;
        self.with_turn(&key, || self.emulator(key.console).manager().stop(&key))?;
        info!("{user} stopped playing '{}'", key.title);
        Ok(())
    }

    /// The console family of the user's active session, if they have one.
    pub fn active_console(&self, user: UserId) -> Option<Console> {
        lock(&self.sessions).get(&user).map(|key| key.console)
    }

    /// Stops every session of every console.
    pub fn shutdown(&self) {
        lock(&self.sessions).clear();
        self.handheld.manager().shutdown();
        self.dual_joypad.manager().shutdown();
    }

    fn active_key(&self, user: UserId) -> Result<CartridgeKey, SessionError> {
        lock(&self.sessions)
            .get(&user)
            .cloned()
            .ok_or(SessionError::SessionNotFound)
    }

    /// The user's active session, provided it is still cached. A session that was reclaimed in the
    /// meantime ends the user's turn at the controls.
    fn live_session(&self, user: UserId) -> Result<(CartridgeKey, SessionHandle), SessionError> {
        let key = self.active_key(user)?;
        match self.emulator(key.console).manager().session(&key) {
            Some(session) => Ok((key, session)),
            None => {
                debug!("Session '{}' of {user} was reclaimed", key.title);
                lock(&self.sessions).remove(&user);
                Err(SessionError::SessionNotFound)
            }
        }
    }

    fn submit(&self, key: &CartridgeKey, user: UserId, token: &str) -> Result<Screen, CommandError> {
        let emulator = self.emulator(key.console);
        let frames = self.with_turn(key, || -> Result<Vec<Frame>, CommandError> {
            self.vault.fetch_or_create_user(user)?;
            let (mut cartridge, style) = self.fetch(key)?;
            let (_, frames) = emulator.input(&mut cartridge, user, token, &style)?;
            self.vault.update_cartridge(&cartridge)?;
            Ok(frames)
        })?;
        self.screen(emulator, frames)
    }

    /// Runs `f` while holding the cartridge's turn. The turn is dropped from the map once nobody
    /// holds or waits for it.
    fn with_turn<T>(&self, key: &CartridgeKey, f: impl FnOnce() -> T) -> T {
        let turn = lock(&self.turns).entry(key.clone()).or_default().clone();
        let digest = {
            let _turn = lock(&turn);
            f()
        };
        let mut turns = lock(&self.turns);
        drop(turn);
        // Waiters clone the turn under the map lock, so a lone reference means nobody is queued
        if turns.get(key).is_some_and(|turn| Arc::strong_count(turn) == 1) {
            turns.remove(key);
        }
        digest
    }

    /// Fetches the cartridge behind a key along with the owner's frame style.
    fn fetch(&self, key: &CartridgeKey) -> Result<(Cartridge, FrameStyle), VaultError> {
        let owner = self.vault.fetch_or_create_user(key.owner)?;
        let cartridge = self.vault.fetch_cartridge(key.owner, key.console, &key.title)?;
        let style = FrameStyle::for_owner(&owner, &cartridge);
        Ok((cartridge, style))
    }

    fn screen(&self, emulator: &ConsoleEmulator, frames: Vec<Frame>) -> Result<Screen, CommandError> {
        let media = emulator.encode(&frames)?;
        Ok(Screen { frames, media })
    }
}
