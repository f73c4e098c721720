//! The storage collaborator. Users and cartridges live in the vault; the coordinator fetches them
//! at the start of every command and writes them back at the end.

use std::collections::HashMap;
use std::sync::PoisonError;
use std::sync::RwLock;

use cabinet::Cartridge;
use cabinet::CartridgeKey;
use cabinet::Console;
use cabinet::User;
use cabinet::UserId;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum VaultError {
    #[display("no such cartridge in the vault")]
    CartridgeNotFound,
    /// The user already has a cartridge with this title, or with this exact ROM.
    #[display("the game is already registered")]
    GameAlreadyRegistered,
    #[display("the user is not registered")]
    UserNotRegistered,
}

pub trait Vault: Send + Sync {
    /// Fetches a user, registering them with default settings on first contact.
    fn fetch_or_create_user(&self, id: UserId) -> Result<User, VaultError>;

    fn update_user(&self, id: UserId, user: &User) -> Result<(), VaultError>;

    fn fetch_cartridge(&self, owner: UserId, console: Console, title: &str) -> Result<Cartridge, VaultError>;

    /// Persists the runtime fields (`state`, `save_state`, `play_time`) of a registered cartridge.
    fn update_cartridge(&self, cartridge: &Cartridge) -> Result<(), VaultError>;
}

/// A vault that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryVault {
    users: RwLock<HashMap<UserId, User>>,
    cartridges: RwLock<HashMap<CartridgeKey, Cartridge>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks a cartridge in. A user can not have two cartridges with the same title on one
    /// console, nor the same ROM under two titles.
    pub fn register_cartridge(&self, cartridge: Cartridge) -> Result<(), VaultError> {
        let mut cartridges = self.cartridges.write().unwrap_or_else(PoisonError::into_inner);
        let key = cartridge.key();
        let duplicate = cartridges.contains_key(&key)
            || cartridges
                .values()
                .any(|other| other.owner == cartridge.owner && other.rom_hash() == cartridge.rom_hash());
        if duplicate {
            return Err(VaultError::GameAlreadyRegistered);
        }
        debug!("Registered '{}' for {}", key.title, key.owner);
        cartridges.insert(key, cartridge);
        Ok(())
    }

    pub fn register_user(&self, user: User) {
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user.id, user);
    }
}

impl Vault for MemoryVault {
    fn fetch_or_create_user(&self, id: UserId) -> Result<User, VaultError> {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        Ok(users.entry(id).or_insert_with(|| User::new(id)).clone())
    }

    fn update_user(&self, id: UserId, user: &User) -> Result<(), VaultError> {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        let stored = users.get_mut(&id).ok_or(VaultError::UserNotRegistered)?;
        *stored = user.clone();
        Ok(())
    }

    fn fetch_cartridge(&self, owner: UserId, console: Console, title: &str) -> Result<Cartridge, VaultError> {
        self.cartridges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&CartridgeKey::new(owner, console, title))
            .cloned()
            .ok_or(VaultError::CartridgeNotFound)
    }

    fn update_cartridge(&self, cartridge: &Cartridge) -> Result<(), VaultError> {
        let mut cartridges = self.cartridges.write().unwrap_or_else(PoisonError::into_inner);
        let stored = cartridges
            .get_mut(&cartridge.key())
            .ok_or(VaultError::CartridgeNotFound)?;
        stored.state = cartridge.state.clone();
        stored.save_state = cartridge.save_state.clone();
        stored.play_time = cartridge.play_time;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cartridges_are_unique_per_title_and_rom() {
        let vault = MemoryVault::new();
        vault
            .register_cartridge(Cartridge::new(1, Console::Handheld, "Snake", b"snake".to_vec()))
            .unwrap();
        let same_title = Cartridge::new(1, Console::Handheld, "Snake", b"other".to_vec());
        assert_eq!(vault.register_cartridge(same_title), Err(VaultError::GameAlreadyRegistered));
        let same_rom = Cartridge::new(1, Console::Handheld, "Snake II", b"snake".to_vec());
        assert_eq!(vault.register_cartridge(same_rom), Err(VaultError::GameAlreadyRegistered));
        // Another owner, or another console, is fine
        vault
            .register_cartridge(Cartridge::new(2, Console::Handheld, "Snake", b"snake".to_vec()))
            .unwrap();
        vault
            .register_cartridge(Cartridge::new(1, Console::DualJoypad, "Snake", b"nes snake".to_vec()))
            .unwrap();
    }

    #[test]
    fn updates_only_touch_runtime_fields() {
        let vault = MemoryVault::new();
        vault
            .register_cartridge(Cartridge::new(1, Console::Handheld, "Snake", b"snake".to_vec()))
            .unwrap();
        let mut cart = vault.fetch_cartridge(1, Console::Handheld, "Snake").unwrap();
        cart.state = Some(vec![1, 2, 3]);
        cart.play_time = 42;
        cart.border = None;
        vault.update_cartridge(&cart).unwrap();
        let stored = vault.fetch_cartridge(1, Console::Handheld, "Snake").unwrap();
        assert_eq!(stored.state, Some(vec![1, 2, 3]));
        assert_eq!(stored.play_time, 42);
        assert_eq!(stored.border.as_deref(), Some("border.png"));
        assert_eq!(
            vault.fetch_cartridge(1, Console::Handheld, "Tetris").unwrap_err(),
            VaultError::CartridgeNotFound
        );
        let missing = Cartridge::new(9, Console::Handheld, "Tetris", b"tetris".to_vec());
        assert_eq!(vault.update_cartridge(&missing), Err(VaultError::CartridgeNotFound));
    }

    #[test]
    fn users_are_created_on_first_contact() {
        let vault = MemoryVault::new();
        let mut user = User::new(5);
        assert_eq!(vault.update_user(5, &user), Err(VaultError::UserNotRegistered));
        assert_eq!(vault.fetch_or_create_user(5).unwrap(), user);
        user.premium = true;
        vault.update_user(5, &user).unwrap();
        assert!(vault.fetch_or_create_user(5).unwrap().premium);
    }
}
