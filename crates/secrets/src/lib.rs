//! secrets - Personal secrets store for Daedalos
//!
//! "Secrets should be invisible until you need them."
//!
//! Each secret is a passphrase-encrypted file in `~/.secrets`. Asking for
//! one decrypts it straight into the clipboard and wipes the clipboard
//! again after a timeout, so the plaintext never touches the terminal or
//! the disk.

pub mod cipher;
pub mod clipboard;
pub mod config;
pub mod error;
pub mod prompt;
pub mod service;
pub mod session;
pub mod store;

use std::sync::Arc;

pub use cipher::{AgeCipher, Cipher, CipherError};
pub use clipboard::{Backend, Clipboard, CommandClipboard, MemoryClipboard};
pub use config::Config;
pub use error::{Result, SecretsError};
pub use service::SecretService;
pub use session::{ClearScheduler, ClipboardSession, Exposure, ExposureState, GenerationLedger};
pub use store::SecretStore;

/// Clipboard session for the platform clipboard, as configured
pub fn clipboard_session(config: &Config, scheduler: ClearScheduler) -> Result<ClipboardSession> {
    let clipboard = CommandClipboard::new(config.clipboard_backend()?);

    Ok(ClipboardSession::new(
        Arc::new(clipboard),
        GenerationLedger::new(config.ledger_path()),
        config.clipboard_ttl(),
        scheduler,
    ))
}

/// Service over the configured store, the age cipher and the platform
/// clipboard
pub fn open_service(config: &Config, scheduler: ClearScheduler) -> Result<SecretService> {
    Ok(SecretService::new(
        SecretStore::new(&config.store_dir),
        Box::new(AgeCipher::new()),
        clipboard_session(config, scheduler)?,
    ))
}
