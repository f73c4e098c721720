//! Concierge routes the commands of chat users to the cabinet engine: it knows which session each
//! user is playing, fetches their cartridges from the vault, and writes the new state back after
//! every command.

mod coordinator;
mod vault;

pub use coordinator::CommandError;
pub use coordinator::Screen;
pub use coordinator::SessionCoordinator;
pub use vault::MemoryVault;
pub use vault::Vault;
pub use vault::VaultError;
