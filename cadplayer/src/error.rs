//! Error types shared by player backends.

/// Errors surfaced by `Player` implementations and the track cache.
///
/// `Clone` so the track cache can store a failed reload and resurface it to
/// every reader until the next successful reload.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// The daemon could not be reached or the connection dropped mid-command.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The daemon rejected a command or returned something we cannot decode.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A request that makes no sense in the player's current state.
    #[error("Invalid player state: {0}")]
    State(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

/// Specialized Result type for player operations.
pub type Result<T> = std::result::Result<T, Error>;
