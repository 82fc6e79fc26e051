//! Configuration for the secrets tool
//!
//! Read from `~/.config/daedalos/secrets.json` when it exists; every field
//! has a default. `SECRETS_DIR` and `SECRETS_CLIPBOARD_TTL` override the
//! file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clipboard::Backend;
use crate::error::{Result, SecretsError};
use crate::session::DEFAULT_CLIPBOARD_TTL;

pub const ENV_STORE_DIR: &str = "SECRETS_DIR";
pub const ENV_CLIPBOARD_TTL: &str = "SECRETS_CLIPBOARD_TTL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding one encrypted file per secret (~/.secrets)
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Seconds a copied secret stays in the clipboard
    #[serde(default = "default_clipboard_ttl_secs")]
    pub clipboard_ttl_secs: u64,

    /// Force a clipboard backend instead of detecting one
    #[serde(default)]
    pub clipboard_backend: Option<String>,

    /// Non-secret runtime state (~/.local/share/daedalos/secrets)
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

// Without a home directory the defaults are empty paths, which `validate`
// rejects; `~` would be taken literally and land under the CWD.
fn default_store_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".secrets"))
        .unwrap_or_default()
}

fn default_clipboard_ttl_secs() -> u64 {
    DEFAULT_CLIPBOARD_TTL.as_secs()
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .map(|data| data.join("daedalos").join("secrets"))
        .unwrap_or_default()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            clipboard_ttl_secs: default_clipboard_ttl_secs(),
            clipboard_backend: None,
            state_dir: default_state_dir(),
        }
    }
}

/// Location of the config file, if there is a config directory
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("daedalos").join("secrets.json"))
}

impl Config {
    /// Load config from file, falling back to defaults if it is missing
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| SecretsError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Config file plus environment overrides, validated
    pub fn resolve() -> Result<Self> {
        let config = match config_path() {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        let config = config.with_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(dir) = lookup(ENV_STORE_DIR).filter(|d| !d.is_empty()) {
            self.store_dir = PathBuf::from(dir);
        }

        if let Some(ttl) = lookup(ENV_CLIPBOARD_TTL) {
            self.clipboard_ttl_secs = ttl.trim().parse().map_err(|_| {
                SecretsError::Config(format!("{} must be a number of seconds, got '{}'", ENV_CLIPBOARD_TTL, ttl))
            })?;
        }

        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        check_dir("store_dir", &self.store_dir, Some(ENV_STORE_DIR))?;
        check_dir("state_dir", &self.state_dir, None)?;

        if self.clipboard_ttl_secs == 0 {
            return Err(SecretsError::Config(
                "clipboard_ttl_secs must be greater than zero".to_string(),
            ));
        }

        self.clipboard_backend()?;
        Ok(())
    }

    pub fn clipboard_ttl(&self) -> Duration {
        Duration::from_secs(self.clipboard_ttl_secs)
    }

    /// The configured backend, or `None` to auto-detect
    pub fn clipboard_backend(&self) -> Result<Option<Backend>> {
        match &self.clipboard_backend {
            None => Ok(None),
            Some(name) => Backend::from_name(name).map(Some).ok_or_else(|| {
                SecretsError::Config(format!("unknown clipboard backend '{}'", name))
            }),
        }
    }

    /// Path of the clipboard generation ledger
    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join("clipboard.json")
    }
}

fn check_dir(field: &str, dir: &Path, env_override: Option<&str>) -> Result<()> {
    if dir.as_os_str().is_empty() {
        let hint = match env_override {
            Some(var) => format!("; set {} or {} in the config file", var, field),
            None => format!("; set {} in the config file", field),
        };
        return Err(SecretsError::Config(format!(
            "could not determine the home directory for {}{}",
            field, hint
        )));
    }

    if !dir.is_absolute() {
        return Err(SecretsError::Config(format!(
            "{} must be an absolute path, got '{}'",
            field,
            dir.display()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.clipboard_ttl(), Duration::from_secs(30));
        assert!(config.store_dir.ends_with(".secrets"));
        assert!(config.ledger_path().ends_with("secrets/clipboard.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load(&tmp.path().join("nope.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("secrets.json");
        std::fs::write(&path, r#"{"clipboard_ttl_secs": 10, "clipboard_backend": "xsel"}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.clipboard_ttl_secs, 10);
        assert_eq!(config.clipboard_backend().unwrap(), Some(Backend::Xsel));
        assert_eq!(config.store_dir, default_store_dir());
    }

    #[test]
    fn test_malformed_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("secrets.json");
        std::fs::write(&path, "{").unwrap();

        assert!(matches!(Config::load(&path), Err(SecretsError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::default()
            .with_overrides(env(&[(ENV_STORE_DIR, "/tmp/vault"), (ENV_CLIPBOARD_TTL, "45")]))
            .unwrap();

        assert_eq!(config.store_dir, PathBuf::from("/tmp/vault"));
        assert_eq!(config.clipboard_ttl(), Duration::from_secs(45));
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::default()
            .with_overrides(env(&[(ENV_CLIPBOARD_TTL, "soon")]))
            .unwrap_err();
        assert!(matches!(err, SecretsError::Config(_)));

        let zero = Config {
            clipboard_ttl_secs: 0,
            ..Config::default()
        };
        assert!(zero.validate().is_err());

        let unknown = Config {
            clipboard_backend: Some("clippy".to_string()),
            ..Config::default()
        };
        assert!(unknown.validate().is_err());
    }

    #[test]
    fn test_paths_must_be_absolute() {
        // What the defaults hold when no home directory can be found
        let homeless = Config {
            store_dir: PathBuf::new(),
            ..Config::default()
        };
        let err = homeless.validate().unwrap_err();
        assert!(matches!(err, SecretsError::Config(ref msg) if msg.contains(ENV_STORE_DIR)));

        let homeless = Config {
            state_dir: PathBuf::new(),
            ..Config::default()
        };
        assert!(matches!(homeless.validate(), Err(SecretsError::Config(_))));

        // `~` is not expanded, so it would be a directory under the CWD
        let tilde = Config::default()
            .with_overrides(env(&[(ENV_STORE_DIR, "~/.secrets")]))
            .unwrap();
        assert!(matches!(tilde.validate(), Err(SecretsError::Config(_))));

        let tilde = Config {
            state_dir: PathBuf::from("~/.local/share"),
            ..Config::default()
        };
        assert!(matches!(tilde.validate(), Err(SecretsError::Config(_))));

        let absolute = Config {
            store_dir: PathBuf::from("/tmp/vault"),
            ..Config::default()
        };
        assert!(absolute.validate().is_ok());
    }
}
