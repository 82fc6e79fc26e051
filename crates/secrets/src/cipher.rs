//! Password-based encryption of secret values
//!
//! Uses age passphrase encryption (https://age-encryption.org): a fresh
//! random salt per file, scrypt with a work factor calibrated to the
//! machine, and ChaCha20-Poly1305 for the payload. Output is ASCII-armored
//! so a secret file is plain text.

use std::io::{Read, Write};

use age::armor::{ArmoredReader, ArmoredWriter, Format};
use age::secrecy::{ExposeSecret, SecretString, SecretVec};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum CipherError {
    /// The password did not match, or the ciphertext is damaged.
    /// Callers must not be able to tell which.
    #[error("wrong password or corrupted data")]
    WrongPasswordOrCorrupt,

    #[error("{0}")]
    Encryption(String),
}

/// A password-based symmetric cipher
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8], password: &SecretString) -> Result<Vec<u8>, CipherError>;

    fn decrypt(
        &self,
        ciphertext: &[u8],
        password: &SecretString,
    ) -> Result<SecretVec<u8>, CipherError>;
}

/// age passphrase cipher with armored output
#[derive(Debug, Clone, Default)]
pub struct AgeCipher {
    /// Upper bound on the scrypt log2(N) accepted when decrypting.
    /// `None` lets age pick a bound from this machine's speed.
    max_work_factor: Option<u8>,
}

impl AgeCipher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_work_factor(mut self, log_n: u8) -> Self {
        self.max_work_factor = Some(log_n);
        self
    }
}

impl Cipher for AgeCipher {
    fn encrypt(&self, plaintext: &[u8], password: &SecretString) -> Result<Vec<u8>, CipherError> {
        let encryptor =
            age::Encryptor::with_user_passphrase(SecretString::new(password.expose_secret().clone()));

        let mut encrypted = vec![];
        let armored = ArmoredWriter::wrap_output(&mut encrypted, Format::AsciiArmor)
            .map_err(|e| CipherError::Encryption(e.to_string()))?;

        let mut writer = encryptor
            .wrap_output(armored)
            .map_err(|e| CipherError::Encryption(e.to_string()))?;

        writer
            .write_all(plaintext)
            .map_err(|e| CipherError::Encryption(e.to_string()))?;

        writer
            .finish()
            .and_then(|armor| armor.finish())
            .map_err(|e| CipherError::Encryption(e.to_string()))?;

        Ok(encrypted)
    }

    fn decrypt(
        &self,
        ciphertext: &[u8],
        password: &SecretString,
    ) -> Result<SecretVec<u8>, CipherError> {
        let decryptor = match age::Decryptor::new(ArmoredReader::new(ciphertext)) {
            Ok(age::Decryptor::Passphrase(d)) => d,
            Ok(_) => {
                debug!("ciphertext is not passphrase-encrypted");
                return Err(CipherError::WrongPasswordOrCorrupt);
            }
            Err(e) => {
                debug!("unreadable age header: {}", e);
                return Err(CipherError::WrongPasswordOrCorrupt);
            }
        };

        let mut reader = decryptor
            .decrypt(password, self.max_work_factor)
            .map_err(|e| {
                debug!("passphrase rejected: {}", e);
                CipherError::WrongPasswordOrCorrupt
            })?;

        let mut buf = vec![];
        let read = reader.read_to_end(&mut buf);
        // Wrap before checking so a partial plaintext is zeroed too
        let plaintext = SecretVec::new(buf);

        read.map_err(|e| {
            debug!("payload failed authentication: {}", e);
            CipherError::WrongPasswordOrCorrupt
        })?;

        Ok(plaintext)
    }
}
