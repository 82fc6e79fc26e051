//! Errors surfaced by the secrets store

use thiserror::Error;

use crate::cipher::CipherError;

/// Everything a secrets operation can fail with.
///
/// Wrong passwords and corrupted files share one variant on purpose: the
/// user only ever sees "wrong password".
#[derive(Error, Debug)]
pub enum SecretsError {
    #[error("Invalid secret name: {0}")]
    InvalidName(String),

    #[error("Secret already exists: {0}")]
    AlreadyExists(String),

    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Wrong password")]
    WrongPassword,

    #[error("Clipboard unavailable: {0}")]
    ClipboardUnavailable(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CipherError> for SecretsError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::WrongPasswordOrCorrupt => Self::WrongPassword,
            CipherError::Encryption(msg) => Self::Encryption(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, SecretsError>;
