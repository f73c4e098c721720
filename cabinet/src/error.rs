//! The failures the engine can report. Every failure is deterministic given the current state of
//! the cache and the cartridge, so none of them are retried internally. They are handed back to
//! the caller, which owns the user-facing messaging.

/// Every way a session operation can fail.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum SessionError {
    /// There is no live session for the cartridge or user. This is also what a caller sees after
    /// the idle sweep silently reclaimed a session (a.k.a. "game not started").
    #[display("no game is running for this session")]
    SessionNotFound,
    /// The user tried to remove someone that was never given a joypad.
    #[display("the user was not invited to this session")]
    UserNotInvited,
    /// The user tried to drive a session that they were not authorized for.
    #[display("the user does not hold a joypad for this session")]
    UnauthorizedJoypadAccess,
    /// The owner can neither invite nor remove themselves.
    #[display("the user owns this cartridge")]
    UserIsCartridgeOwner,
    /// Every joypad of the console is already taken.
    #[display("every joypad of this console is taken")]
    NotEnoughJoypads,
    #[display("the user already holds a joypad for this session")]
    UserAlreadyInvited,
    /// A checkpoint load was requested before any checkpoint was saved.
    #[display("the cartridge has no saved checkpoint")]
    NoSaveState,
    /// The rewind history is empty.
    #[display("there is no earlier state to rewind to")]
    NoPreviousState,
    /// The core could not produce a frame (or produced none at all).
    #[display("the emulation core produced no frame data")]
    InvalidFrameData,
    /// The cartridge belongs to another console family or the family name is unknown.
    #[display("the console is not valid for this cartridge")]
    ConsoleNotValid,
    #[display("'{token}' is not a joypad button")]
    UnknownButton {
        token: String,
    },
    #[display("{_0}")]
    Core(CoreError),
    #[display("failed to encode frames: {message}")]
    FrameEncoding {
        message: String,
    },
}

/// A failure reported by an emulation core adapter.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("emulation core failure: {message}")]
pub struct CoreError {
    message: String,
}

impl CoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<CoreError> for SessionError {
    fn from(err: CoreError) -> Self {
        Self::Core(err)
    }
}

impl From<png::EncodingError> for SessionError {
    fn from(err: png::EncodingError) -> Self {
        Self::FrameEncoding {
            message: err.to_string(),
        }
    }
}

impl From<gif::EncodingError> for SessionError {
    fn from(err: gif::EncodingError) -> Self {
        Self::FrameEncoding {
            message: err.to_string(),
        }
    }
}
