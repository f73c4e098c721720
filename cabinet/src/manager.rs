//! The instance manager: a cache of at most one live [`GameInstance`] per cartridge, the users
//! allowed to drive each one, and the background sweep that reclaims idle instances.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::TryLockError;
use std::sync::Weak;

use indexmap::IndexSet;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::AssetStore;
use crate::Cartridge;
use crate::CartridgeKey;
use crate::Console;
use crate::CoreFactory;
use crate::EngineConfig;
use crate::GameInstance;
use crate::SessionError;
use crate::UserId;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the sessions of one console family.
pub struct InstanceManager {
    shared: Arc<Shared>,
    sweeper: Mutex<Option<oneshot::Sender<()>>>,
}

struct Shared {
    console: Console,
    factory: Arc<dyn CoreFactory>,
    assets: Arc<AssetStore>,
    config: EngineConfig,
    sessions: Mutex<HashMap<CartridgeKey, Arc<SessionEntry>>>,
}

/// A cached session. The game slot is empty only while the first caller is building the
/// instance, and after the entry has been retired.
struct SessionEntry {
    key: CartridgeKey,
    /// The owner is always first and never leaves.
    users: Mutex<IndexSet<UserId>>,
    last_access: Mutex<Instant>,
    game: Mutex<Option<GameInstance>>,
    retired: AtomicBool,
}

impl SessionEntry {
    fn new(key: CartridgeKey) -> Self {
        let users = IndexSet::from([key.owner]);
        Self {
            key,
            users: Mutex::new(users),
            last_access: Mutex::new(Instant::now()),
            game: Mutex::new(None),
            retired: AtomicBool::new(false),
        }
    }

    fn touch(&self) {
        *lock(&self.last_access) = Instant::now();
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }
}

/// A caller's view of a cached session.
#[derive(Clone)]
pub struct SessionHandle {
    entry: Arc<SessionEntry>,
}

impl SessionHandle {
    pub fn key(&self) -> &CartridgeKey {
        &self.entry.key
    }

    /// The authorized users, owner first.
    pub fn users(&self) -> Vec<UserId> {
        lock(&self.entry.users).iter().copied().collect()
    }

    /// The joypad held by `user`, i.e. their position in the authorized list.
    pub fn player(&self, user: UserId) -> Option<usize> {
        lock(&self.entry.users).get_index_of(&user)
    }

    /// Runs `f` with exclusive access to the game instance. Fails with
    /// [`SessionError::SessionNotFound`] if the session was reclaimed since the handle was handed
    /// out.
    pub fn with_game<T>(&self, f: impl FnOnce(&mut GameInstance) -> Result<T, SessionError>) -> Result<T, SessionError> {
        let mut game = lock(&self.entry.game);
        if self.entry.is_retired() {
            return Err(SessionError::SessionNotFound);
        }
        let game = game.as_mut().ok_or(SessionError::SessionNotFound)?;
        let digest = f(game);
        self.entry.touch();
        digest
    }

    /// Whether the session is still cached.
    pub fn is_live(&self) -> bool {
        !self.entry.is_retired()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("key", &self.entry.key)
            .field("users", &self.users())
            .field("live", &self.is_live())
            .finish()
    }
}

impl InstanceManager {
    /// Creates the manager and, when called from within a Tokio runtime, starts the idle sweep.
    pub fn launch(
        console: Console,
        factory: impl CoreFactory + 'static,
        assets: Arc<AssetStore>,
        config: EngineConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            console,
            factory: Arc::new(factory),
            assets,
            config,
            sessions: Mutex::default(),
        });
        let sweeper = spawn_sweeper(&shared);
        Self {
            shared,
            sweeper: Mutex::new(sweeper),
        }
    }

    pub fn console(&self) -> Console {
        self.shared.console
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn assets(&self) -> &AssetStore {
        &self.shared.assets
    }

    /// Returns the session of the cartridge together with the joypad `user` holds, creating the
    /// session if there is none. Only the owner can create a session; everyone else has to be
    /// invited into a running one.
    ///
    /// Concurrent first accesses to a cartridge all end up with the same instance: the entry is
    /// published before the instance is built, and the builder holds the entry's game lock until
    /// the instance is in place.
    pub fn get_or_create(&self, cartridge: &Cartridge, user: UserId) -> Result<(SessionHandle, usize), SessionError> {
        if cartridge.console != self.shared.console {
            return Err(SessionError::ConsoleNotValid);
        }
        let key = cartridge.key();
        loop {
            let entry = {
                let mut sessions = lock(&self.shared.sessions);
                match sessions.get(&key) {
                    Some(entry) if !lock(&entry.users).contains(&user) => {
                        return Err(SessionError::UnauthorizedJoypadAccess);
                    }
                    Some(entry) => {
                        entry.touch();
                        entry.clone()
                    }
                    None if user != key.owner => return Err(SessionError::UnauthorizedJoypadAccess),
                    None => {
                        info!("Creating a {} session for '{}' of {}", key.console, key.title, key.owner);
                        let entry = Arc::new(SessionEntry::new(key.clone()));
                        sessions.insert(key.clone(), entry.clone());
                        entry
                    }
                }
            };
            let handle = SessionHandle { entry };
            let player = handle.player(user).ok_or(SessionError::UnauthorizedJoypadAccess)?;
            let mut game = lock(&handle.entry.game);
            if handle.entry.is_retired() {
                // Reclaimed while we waited for the lock, so start over with a fresh entry
                continue;
            }
            if game.is_none() {
                match self.shared.build(cartridge) {
                    Ok(instance) => *game = Some(instance),
                    Err(err) => {
                        warn!("Could not start '{}' for {}: {err}", key.title, key.owner);
                        handle.entry.retire();
                        self.shared.forget(&handle.entry);
                        return Err(err);
                    }
                }
            }
            drop(game);
            return Ok((handle, player));
        }
    }

    /// The cached session of a cartridge, if any.
    pub fn session(&self, key: &CartridgeKey) -> Option<SessionHandle> {
        lock(&self.shared.sessions)
            .get(key)
            .map(|entry| SessionHandle { entry: entry.clone() })
    }

    /// Finds the session a user is part of. If the user owns a live session, that one wins over
    /// the sessions they were invited to.
    pub fn lookup_by_user(&self, user: UserId) -> Result<SessionHandle, SessionError> {
        let sessions = lock(&self.shared.sessions);
        let owned = sessions.values().find(|entry| entry.key.owner == user);
        owned
            .or_else(|| sessions.values().find(|entry| lock(&entry.users).contains(&user)))
            .map(|entry| SessionHandle { entry: entry.clone() })
            .ok_or(SessionError::SessionNotFound)
    }

    /// Gives `user` the next free joypad of a running session.
    pub fn add_user(&self, key: &CartridgeKey, user: UserId) -> Result<usize, SessionError> {
        if user == key.owner {
            return Err(SessionError::UserIsCartridgeOwner);
        }
        let entry = self.entry(key)?;
        let mut users = lock(&entry.users);
        if users.len() >= self.shared.console.max_players() {
            return Err(SessionError::NotEnoughJoypads);
        }
        if users.contains(&user) {
            return Err(SessionError::UserAlreadyInvited);
        }
        let (player, _) = users.insert_full(user);
        info!("Gave joypad {player} of '{}' to {user}", key.title);
        Ok(player)
    }

    /// Takes the joypad away from an invited user. The owner can never be removed.
    pub fn remove_user(&self, key: &CartridgeKey, user: UserId) -> Result<(), SessionError> {
        if user == key.owner {
            return Err(SessionError::UserIsCartridgeOwner);
        }
        let entry = self.entry(key)?;
        if !lock(&entry.users).shift_remove(&user) {
            return Err(SessionError::UserNotInvited);
        }
        info!("Took the joypad of '{}' away from {user}", key.title);
        Ok(())
    }

    /// Stops a session right away, waiting for any in-flight operation on it to finish first.
    pub fn stop(&self, key: &CartridgeKey) -> Result<(), SessionError> {
        let entry = lock(&self.shared.sessions)
            .remove(key)
            .ok_or(SessionError::SessionNotFound)?;
        entry.retire();
        let game = lock(&entry.game).take();
        if let Some(mut game) = game {
            info!("Stopping '{}' of {}", key.title, key.owner);
            if let Err(err) = game.stop() {
                warn!("Core of '{}' failed to stop cleanly: {err}", key.title);
            }
        }
        Ok(())
    }

    /// Runs one idle sweep and returns the keys of the reclaimed sessions.
    pub fn sweep_idle(&self, now: Instant) -> Vec<CartridgeKey> {
        self.shared.sweep_idle(now)
    }

    pub fn len(&self) -> usize {
        lock(&self.shared.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the idle sweep and every live instance.
    pub fn shutdown(&self) {
        if let Some(stop) = lock(&self.sweeper).take() {
            let _ = stop.send(());
        }
        let entries: Vec<_> = lock(&self.shared.sessions).drain().map(|(_, entry)| entry).collect();
        info!("Shutting down {} {} sessions", entries.len(), self.shared.console);
        for entry in entries {
            entry.retire();
            let game = lock(&entry.game).take();
            if let Some(mut game) = game {
                if let Err(err) = game.stop() {
                    warn!("Core of '{}' failed to stop cleanly: {err}", entry.key.title);
                }
            }
        }
    }

    fn entry(&self, key: &CartridgeKey) -> Result<Arc<SessionEntry>, SessionError> {
        lock(&self.shared.sessions)
            .get(key)
            .cloned()
            .ok_or(SessionError::SessionNotFound)
    }
}

impl Shared {
    fn build(&self, cartridge: &Cartridge) -> Result<GameInstance, SessionError> {
        let core = self.factory.build()?;
        let boot = self
            .assets
            .boot_animation(self.console, cartridge.boot_animation.as_deref(), &self.config);
        let mut game = GameInstance::new(self.console, core, cartridge.rom(), boot, self.config.ticks_per_frame)?;
        if let Some(state) = &cartridge.state {
            game.load_state(state)?;
        }
        Ok(game)
    }

    /// Drops the entry from the map, unless it has already been replaced.
    fn forget(&self, entry: &Arc<SessionEntry>) {
        let mut sessions = lock(&self.sessions);
        if sessions.get(&entry.key).is_some_and(|cached| Arc::ptr_eq(cached, entry)) {
            sessions.remove(&entry.key);
        }
    }

    /// Entries that are in use are skipped; touching an entry and reclaiming it both happen under
    /// the map lock, so they never interleave.
    fn sweep_idle(&self, now: Instant) -> Vec<CartridgeKey> {
        let timeout = self.config.instance_timeout();
        let mut reclaimed = Vec::new();
        {
            let mut sessions = lock(&self.sessions);
            sessions.retain(|key, entry| {
                let idle = now.saturating_duration_since(*lock(&entry.last_access));
                if idle <= timeout {
                    return true;
                }
                let mut game = match entry.game.try_lock() {
                    Ok(game) => game,
                    Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                    Err(TryLockError::WouldBlock) => return true,
                };
                entry.retire();
                reclaimed.push((key.clone(), game.take()));
                false
            });
        }
        for (key, game) in &mut reclaimed {
            info!("Reclaiming idle {} session '{}' of {}", key.console, key.title, key.owner);
            if let Some(game) = game {
                if let Err(err) = game.stop() {
                    warn!("Core of '{}' failed to stop cleanly: {err}", key.title);
                }
            }
        }
        reclaimed.into_iter().map(|(key, _)| key).collect()
    }
}

/// Spawns the task that periodically reclaims idle sessions. The task holds a weak reference, so
/// it winds down once the manager is gone, even if it was never told to stop.
fn spawn_sweeper(shared: &Arc<Shared>) -> Option<oneshot::Sender<()>> {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!("No async runtime available, idle {} sessions will not be reclaimed", shared.console);
        return None;
    };
    let (send, mut recv) = oneshot::channel::<()>();
    let shared: Weak<Shared> = Arc::downgrade(shared);
    runtime.spawn(async move {
        let Some(period) = shared.upgrade().map(|shared| shared.config.sweep_interval()) else {
            return;
        };
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut recv => break,
                _ = timer.tick() => {
                    let Some(shared) = shared.upgrade() else {
                        break;
                    };
                    let reclaimed = shared.sweep_idle(Instant::now());
                    debug!("Idle sweep reclaimed {} sessions", reclaimed.len());
                }
            }
        }
        debug!("Idle sweep stopped");
    });
    Some(send)
}
