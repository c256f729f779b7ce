use std::path::PathBuf;

/// Core error type for the relay daemon.
///
/// Adapter crates map their specific errors into this type so the bot loop
/// can tell absorbed failures (transport, storage) from instance faults.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt state file: {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("link error: {0}")]
    Link(String),

    #[error("relay error: {0}")]
    Relay(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
