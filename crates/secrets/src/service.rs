//! SecretService - get/set/delete/list on top of the store, the cipher and
//! the clipboard session

use age::secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::cipher::Cipher;
use crate::error::{Result, SecretsError};
use crate::session::{ClipboardSession, Exposure, ExposureState};
use crate::store::{validate_name, SecretStore};

pub struct SecretService {
    store: SecretStore,
    cipher: Box<dyn Cipher>,
    clipboard: ClipboardSession,
}

impl SecretService {
    pub fn new(store: SecretStore, cipher: Box<dyn Cipher>, clipboard: ClipboardSession) -> Self {
        Self {
            store,
            cipher,
            clipboard,
        }
    }

    pub fn store(&self) -> &SecretStore {
        &self.store
    }

    /// Decrypt `name` into the clipboard.
    ///
    /// A wrong password leaves the clipboard untouched. Succeeds only if
    /// the clipboard write succeeded too.
    pub fn get(&self, name: &str, password: &SecretString) -> Result<Exposure> {
        if !self.store.exists(name)? {
            return Err(SecretsError::NotFound(name.to_string()));
        }

        let ciphertext = self.store.read(name)?;
        let plaintext = self.cipher.decrypt(&ciphertext, password)?;
        let exposure = self.clipboard.expose(plaintext.expose_secret())?;

        info!(name, generation = exposure.generation, "copied secret to clipboard");
        Ok(exposure)
    }

    /// Encrypt `value` with `password` and store it as a new secret
    pub fn set(&self, name: &str, value: &[u8], password: &SecretString) -> Result<()> {
        validate_name(name)?;

        // Checked up front so a taken name costs no key derivation
        if self.store.exists(name)? {
            return Err(SecretsError::AlreadyExists(name.to_string()));
        }

        let ciphertext = self.cipher.encrypt(value, password)?;
        self.store.create(name, &ciphertext)?;

        info!(name, "stored secret");
        Ok(())
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        self.store.delete(name)?;
        info!(name, "deleted secret");
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<String>> {
        self.store.list()
    }

    /// Empty the clipboard and cancel any pending clear
    pub fn clear_clipboard(&self) -> Result<()> {
        self.clipboard.clear()
    }

    pub fn clipboard_state(&self) -> Result<ExposureState> {
        self.clipboard.state()
    }
}
