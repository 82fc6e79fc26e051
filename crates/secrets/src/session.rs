//! ClipboardSession - the timed window during which a secret sits in the
//! clipboard
//!
//! Every `expose` takes a new generation number from the ledger and
//! schedules a clear tagged with it. A scheduled clear only acts if its
//! generation is still current, so a timer left over from an earlier
//! exposure can never wipe a newer secret. The ledger is a small JSON file
//! under an exclusive `flock`, which makes the check-and-clear atomic
//! against `expose` even when the timer runs in another process.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clipboard::Clipboard;
use crate::error::{Result, SecretsError};

/// Default time a secret stays in the clipboard
pub const DEFAULT_CLIPBOARD_TTL: Duration = Duration::from_secs(30);

/// Hidden subcommand a detached clear runs as
pub const CLEAR_SUBCOMMAND: &str = "clipboard-clear";

/// One plaintext-in-clipboard window. The plaintext itself is not kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exposure {
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ttl: Duration,
}

/// What the ledger says about the clipboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureState {
    Idle,
    Exposed {
        generation: u64,
        expires_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerRecord {
    generation: u64,
    /// Set while a secret is in the clipboard
    expires_at: Option<DateTime<Utc>>,
}

impl LedgerRecord {
    /// Fresh record for a ledger whose contents were lost. Generations
    /// advance by one per exposure or clear, far slower than the clock in
    /// milliseconds, so the seed lies beyond any generation a
    /// still-sleeping timer could hold.
    fn reset() -> Self {
        Self {
            generation: u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0),
            expires_at: None,
        }
    }
}

/// File-backed generation counter shared by every process using the store
#[derive(Debug, Clone)]
pub struct GenerationLedger {
    path: PathBuf,
}

/// Exclusive hold on the ledger; released when dropped
struct LedgerGuard {
    file: File,
    record: LedgerRecord,
}

impl GenerationLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<LedgerGuard> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(&self.path)?;

        // SAFETY: the descriptor is owned by `file` and outlives the call
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        let mut content = String::new();
        file.read_to_string(&mut content)?;

        let record = if content.trim().is_empty() {
            LedgerRecord::default()
        } else {
            serde_json::from_str(&content).unwrap_or_else(|e| {
                let record = LedgerRecord::reset();
                warn!(
                    path = %self.path.display(),
                    generation = record.generation,
                    "resetting unreadable clipboard ledger: {}",
                    e
                );
                record
            })
        };

        Ok(LedgerGuard { file, record })
    }

    /// Current generation and whether a secret is exposed
    pub fn state(&self) -> Result<ExposureState> {
        let guard = self.lock()?;
        Ok(guard.state())
    }
}

impl LedgerGuard {
    fn state(&self) -> ExposureState {
        match self.record.expires_at {
            Some(expires_at) => ExposureState::Exposed {
                generation: self.record.generation,
                expires_at,
            },
            None => ExposureState::Idle,
        }
    }

    fn store(&mut self, record: LedgerRecord) -> Result<()> {
        let content = serde_json::to_string(&record)
            .map_err(|e| SecretsError::Io(std::io::Error::other(e)))?;

        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(content.as_bytes())?;
        self.file.flush()?;

        self.record = record;
        Ok(())
    }
}

/// Where the auto-clear timer runs
#[derive(Debug, Clone)]
pub enum ClearScheduler {
    /// Sleep on a background thread of this process. The timer dies with
    /// the process.
    Thread,
    /// Re-run `program` as `clipboard-clear --generation N --after SECS`
    /// in its own process group, so the clear outlives the command.
    Detached { program: PathBuf },
}

/// Build the command line for a detached clear. Carries no plaintext.
pub fn detached_clear_command(program: &Path, generation: u64, ttl: Duration) -> Command {
    let mut cmd = Command::new(program);
    cmd.arg(CLEAR_SUBCOMMAND)
        .arg("--generation")
        .arg(generation.to_string())
        .arg("--after")
        .arg(ttl.as_secs().to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0);
    cmd
}

/// Clear the clipboard if `generation` is still the live exposure.
/// Returns whether anything was cleared.
pub fn clear_if_current(
    clipboard: &dyn Clipboard,
    ledger: &GenerationLedger,
    generation: u64,
) -> Result<bool> {
    let mut guard = ledger.lock()?;

    match guard.state() {
        ExposureState::Exposed { generation: live, .. } if live == generation => {}
        _ => {
            debug!(generation, current = guard.record.generation, "stale clipboard timer");
            return Ok(false);
        }
    }

    clipboard.clear()?;
    guard.store(LedgerRecord {
        generation: generation + 1,
        expires_at: None,
    })?;

    info!(generation, "clipboard cleared after timeout");
    Ok(true)
}

/// Owns the clipboard exposure window
pub struct ClipboardSession {
    clipboard: Arc<dyn Clipboard>,
    ledger: GenerationLedger,
    ttl: Duration,
    scheduler: ClearScheduler,
}

impl ClipboardSession {
    pub fn new(
        clipboard: Arc<dyn Clipboard>,
        ledger: GenerationLedger,
        ttl: Duration,
        scheduler: ClearScheduler,
    ) -> Self {
        Self {
            clipboard,
            ledger,
            ttl,
            scheduler,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn state(&self) -> Result<ExposureState> {
        self.ledger.state()
    }

    /// Put `plaintext` in the clipboard and schedule its removal.
    ///
    /// Any earlier pending clear is invalidated in the same critical
    /// section that writes the clipboard. Returns without waiting for the
    /// timeout.
    pub fn expose(&self, plaintext: &[u8]) -> Result<Exposure> {
        let created_at = Utc::now();
        let expires_at = created_at
            + chrono::Duration::from_std(self.ttl)
                .map_err(|e| SecretsError::Config(format!("clipboard TTL out of range: {}", e)))?;

        let generation = {
            let mut guard = self.ledger.lock()?;
            let generation = guard.record.generation + 1;

            // On failure the previous timer stays valid for whatever the
            // clipboard still holds
            self.clipboard.set(plaintext)?;

            if let Err(e) = guard.store(LedgerRecord {
                generation,
                expires_at: Some(expires_at),
            }) {
                let _ = self.clipboard.clear();
                return Err(e);
            }

            generation
        };

        if let Err(e) = self.schedule(generation) {
            warn!(generation, "could not schedule clipboard clear: {}", e);
            let _ = self.clear_if_current(generation);
            return Err(e);
        }

        debug!(generation, ttl_secs = self.ttl.as_secs(), "secret exposed in clipboard");
        Ok(Exposure {
            generation,
            created_at,
            expires_at,
            ttl: self.ttl,
        })
    }

    /// Cancel the pending clear, if any, and empty the clipboard now
    pub fn clear(&self) -> Result<()> {
        let mut guard = self.ledger.lock()?;
        let generation = guard.record.generation + 1;

        self.clipboard.clear()?;
        guard.store(LedgerRecord {
            generation,
            expires_at: None,
        })?;

        debug!(generation, "clipboard cleared on request");
        Ok(())
    }

    /// The body of a scheduled clear
    pub fn clear_if_current(&self, generation: u64) -> Result<bool> {
        clear_if_current(self.clipboard.as_ref(), &self.ledger, generation)
    }

    fn schedule(&self, generation: u64) -> Result<()> {
        match &self.scheduler {
            ClearScheduler::Thread => {
                let clipboard = Arc::clone(&self.clipboard);
                let ledger = self.ledger.clone();
                let ttl = self.ttl;

                // Not joined: the timer must not hold the caller up
                thread::Builder::new()
                    .name("clipboard-clear".to_string())
                    .spawn(move || {
                        thread::sleep(ttl);
                        if let Err(e) = clear_if_current(clipboard.as_ref(), &ledger, generation) {
                            warn!(generation, "scheduled clipboard clear failed: {}", e);
                        }
                    })?;
            }
            ClearScheduler::Detached { program } => {
                let child = detached_clear_command(program, generation, self.ttl).spawn()?;
                debug!(generation, pid = child.id(), "spawned detached clipboard clear");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::{ClipboardEvent, MemoryClipboard};
    use tempfile::TempDir;

    fn session(ttl: Duration) -> (ClipboardSession, Arc<MemoryClipboard>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let clipboard = Arc::new(MemoryClipboard::new());
        let ledger = GenerationLedger::new(tmp.path().join("state").join("clipboard.json"));
        let session = ClipboardSession::new(clipboard.clone(), ledger, ttl, ClearScheduler::Thread);
        (session, clipboard, tmp)
    }

    fn clears(clipboard: &MemoryClipboard) -> usize {
        clipboard
            .events()
            .iter()
            .filter(|e| **e == ClipboardEvent::Cleared)
            .count()
    }

    #[test]
    fn test_expose_then_auto_clear() {
        let (session, clipboard, _tmp) = session(Duration::from_millis(200));

        let exposure = session.expose(b"hunter2").unwrap();
        assert_eq!(exposure.generation, 1);
        assert_eq!(exposure.ttl, Duration::from_millis(200));
        assert_eq!(clipboard.contents(), b"hunter2");
        assert!(matches!(
            session.state().unwrap(),
            ExposureState::Exposed { generation: 1, .. }
        ));

        thread::sleep(Duration::from_millis(700));

        assert!(clipboard.contents().is_empty());
        assert_eq!(session.state().unwrap(), ExposureState::Idle);
        assert_eq!(
            clipboard.events(),
            vec![ClipboardEvent::Set(b"hunter2".to_vec()), ClipboardEvent::Cleared]
        );
    }

    #[test]
    fn test_new_exposure_supersedes_old_timer() {
        let (session, clipboard, _tmp) = session(Duration::from_millis(1000));

        session.expose(b"first").unwrap();
        thread::sleep(Duration::from_millis(500));
        session.expose(b"second").unwrap();

        // Past the first deadline, before the second
        thread::sleep(Duration::from_millis(750));
        assert_eq!(clipboard.contents(), b"second");
        assert_eq!(clears(&clipboard), 0);

        thread::sleep(Duration::from_millis(750));
        assert!(clipboard.contents().is_empty());
        assert_eq!(clears(&clipboard), 1);
    }

    #[test]
    fn test_explicit_clear_cancels_timer() {
        let (session, clipboard, _tmp) = session(Duration::from_millis(200));

        session.expose(b"hunter2").unwrap();
        session.clear().unwrap();
        assert!(clipboard.contents().is_empty());
        assert_eq!(session.state().unwrap(), ExposureState::Idle);

        thread::sleep(Duration::from_millis(600));
        assert_eq!(clears(&clipboard), 1);
    }

    #[test]
    fn test_stale_generation_is_noop() {
        let (session, clipboard, _tmp) = session(Duration::from_secs(600));

        let first = session.expose(b"first").unwrap();
        let second = session.expose(b"second").unwrap();
        assert!(second.generation > first.generation);

        assert!(!session.clear_if_current(first.generation).unwrap());
        assert_eq!(clipboard.contents(), b"second");

        assert!(session.clear_if_current(second.generation).unwrap());
        assert!(clipboard.contents().is_empty());

        // A second firing of the same timer does nothing
        assert!(!session.clear_if_current(second.generation).unwrap());
        assert_eq!(clears(&clipboard), 1);
    }

    #[test]
    fn test_generation_shared_through_ledger_file() {
        let (first, clipboard, tmp) = session(Duration::from_secs(600));
        let ledger = GenerationLedger::new(tmp.path().join("state").join("clipboard.json"));
        let second = ClipboardSession::new(
            clipboard.clone(),
            ledger,
            Duration::from_secs(600),
            ClearScheduler::Thread,
        );

        let a = first.expose(b"a").unwrap();
        let b = second.expose(b"b").unwrap();
        assert_eq!(b.generation, a.generation + 1);

        // The first session's timer belongs to a superseded exposure
        assert!(!first.clear_if_current(a.generation).unwrap());
        assert_eq!(clipboard.contents(), b"b");
    }

    #[test]
    fn test_unavailable_clipboard_keeps_previous_timer() {
        let (session, clipboard, _tmp) = session(Duration::from_secs(600));

        let exposure = session.expose(b"first").unwrap();
        clipboard.set_unavailable(true);

        let err = session.expose(b"second").unwrap_err();
        assert!(matches!(err, SecretsError::ClipboardUnavailable(_)));
        assert!(matches!(
            session.state().unwrap(),
            ExposureState::Exposed { generation, .. } if generation == exposure.generation
        ));

        clipboard.set_unavailable(false);
        assert!(session.clear_if_current(exposure.generation).unwrap());
    }

    #[test]
    fn test_corrupt_ledger_is_reset() {
        let (session, clipboard, tmp) = session(Duration::from_secs(600));
        let path = tmp.path().join("state").join("clipboard.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();

        let before = session.expose(b"old").unwrap();
        assert_eq!(before.generation, 1);

        fs::write(&path, "{not json").unwrap();
        assert_eq!(session.state().unwrap(), ExposureState::Idle);

        let after = session.expose(b"new").unwrap();
        assert!(after.generation > before.generation + 1_000_000);
        assert_eq!(clipboard.contents(), b"new");

        // A timer from before the reset must not wipe the new secret
        assert!(!session.clear_if_current(before.generation).unwrap());
        assert!(!session.clear_if_current(before.generation + 1).unwrap());
        assert_eq!(clipboard.contents(), b"new");

        assert!(session.clear_if_current(after.generation).unwrap());
        assert!(clipboard.contents().is_empty());
    }

    #[test]
    fn test_detached_command_line() {
        let cmd = detached_clear_command(Path::new("/usr/bin/secrets"), 7, Duration::from_secs(30));

        assert_eq!(cmd.get_program(), "/usr/bin/secrets");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(args, vec![CLEAR_SUBCOMMAND, "--generation", "7", "--after", "30"]);
    }
}
