//! SecretStore - the on-disk collection of encrypted secrets
//!
//! One file per secret, named after the secret, holding only the armored
//! ciphertext. There is no manifest: the directory listing is the index,
//! which is fine for the handful of secrets a person keeps but means
//! `list` is a full directory scan.
//!
//! Deletion is a plain unlink. The ciphertext is not overwritten first, so
//! the blocks may survive on disk until reused.

use std::fs::{self, File, Permissions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::Builder;
use tracing::debug;

use crate::error::{Result, SecretsError};

/// Reject names that could escape the store directory or collide with
/// its temporary files.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SecretsError::InvalidName("name cannot be empty".to_string()));
    }

    if name.contains("..") {
        return Err(SecretsError::InvalidName(format!(
            "'{}' contains '..'",
            name
        )));
    }

    if let Some(c) = name.chars().find(|c| matches!(c, '/' | '\\' | '\0')) {
        return Err(SecretsError::InvalidName(format!(
            "'{}' contains forbidden character {:?}",
            name, c
        )));
    }

    // Dotfiles are reserved for in-flight writes
    if name.starts_with('.') {
        return Err(SecretsError::InvalidName(format!(
            "'{}' cannot start with '.'",
            name
        )));
    }

    Ok(())
}

/// Directory-backed store of ciphertext blobs
#[derive(Debug, Clone)]
pub struct SecretStore {
    dir: PathBuf,
}

impl SecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn secret_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Create the store directory (mode 700) if it is missing
    fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
            fs::set_permissions(&self.dir, Permissions::from_mode(0o700))?;
            debug!(dir = %self.dir.display(), "created secrets directory");
        }
        Ok(())
    }

    /// Names of all stored secrets, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }

        let mut names = vec![];
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            // Non-UTF-8 and hidden files were never written by us
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }

            names.push(name);
        }

        names.sort();
        Ok(names)
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        Ok(self.secret_path(name).is_file())
    }

    /// Store a new secret.
    ///
    /// The blob is written and synced to a fresh, uniquely named dotfile
    /// (mode 600), then moved into place without replacing anything. A
    /// racing create of the same name gets `AlreadyExists` and the winner's
    /// blob stays intact. A crash leaves at most an ignored temporary file.
    pub fn create(&self, name: &str, ciphertext: &[u8]) -> Result<()> {
        if self.exists(name)? {
            return Err(SecretsError::AlreadyExists(name.to_string()));
        }

        self.ensure_dir()?;

        let mut temp = Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        temp.write_all(ciphertext)?;
        temp.as_file().sync_all()?;

        // On failure the temp file is removed when the error is dropped
        temp.persist_noclobber(self.secret_path(name))
            .map_err(|e| match e.error.kind() {
                ErrorKind::AlreadyExists => SecretsError::AlreadyExists(name.to_string()),
                _ => SecretsError::from(e.error),
            })?;

        // Persist the new directory entry; not every platform can open a directory
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        debug!(name, "stored secret");
        Ok(())
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        validate_name(name)?;

        fs::read(self.secret_path(name)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SecretsError::NotFound(name.to_string()),
            _ => e.into(),
        })
    }

    /// Unlink a secret. Not a secure erase.
    pub fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;

        fs::remove_file(self.secret_path(name)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SecretsError::NotFound(name.to_string()),
            _ => SecretsError::from(e),
        })?;

        debug!(name, "deleted secret");
        Ok(())
    }
}
