//! Clipboard backends for different platforms

use std::io::{self, ErrorKind, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;

use tracing::debug;

use crate::error::{Result, SecretsError};

/// Write access to a clipboard
pub trait Clipboard: Send + Sync {
    fn set(&self, contents: &[u8]) -> Result<()>;

    fn clear(&self) -> Result<()>;
}

/// Available clipboard backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// macOS pbcopy
    Pbcopy,
    /// Wayland wl-copy
    WlCopy,
    /// X11 xclip
    Xclip,
    /// X11 xsel
    Xsel,
    /// WSL clip.exe
    Wsl,
}

impl Backend {
    /// Detect the best available backend for the current platform
    pub fn detect() -> Option<Self> {
        #[cfg(target_os = "macos")]
        {
            return Self::command_exists("pbcopy").then_some(Self::Pbcopy);
        }

        #[cfg(target_os = "linux")]
        {
            if std::env::var("WSL_DISTRO_NAME").is_ok() && Self::command_exists("clip.exe") {
                return Some(Self::Wsl);
            }
            if std::env::var("WAYLAND_DISPLAY").is_ok() && Self::command_exists("wl-copy") {
                return Some(Self::WlCopy);
            }
            if Self::command_exists("xclip") {
                return Some(Self::Xclip);
            }
            if Self::command_exists("xsel") {
                return Some(Self::Xsel);
            }
            return None;
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            None
        }
    }

    /// Check if a command exists
    fn command_exists(cmd: &str) -> bool {
        Command::new("which")
            .arg(cmd)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Parse a backend name as written in the config file
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pbcopy" => Some(Self::Pbcopy),
            "wl-copy" => Some(Self::WlCopy),
            "xclip" => Some(Self::Xclip),
            "xsel" => Some(Self::Xsel),
            "wsl" => Some(Self::Wsl),
            _ => None,
        }
    }

    /// Get the name of this backend
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pbcopy => "pbcopy",
            Self::WlCopy => "wl-copy",
            Self::Xclip => "xclip",
            Self::Xsel => "xsel",
            Self::Wsl => "wsl",
        }
    }

    /// Program that reads new clipboard contents from stdin
    fn program(&self) -> &'static str {
        match self {
            Self::Pbcopy => "pbcopy",
            Self::WlCopy => "wl-copy",
            Self::Xclip => "xclip",
            Self::Xsel => "xsel",
            Self::Wsl => "clip.exe",
        }
    }

    fn copy_args(&self) -> &'static [&'static str] {
        match self {
            Self::Xclip => &["-selection", "clipboard", "-in"],
            Self::Xsel => &["--clipboard", "--input"],
            Self::Pbcopy | Self::WlCopy | Self::Wsl => &[],
        }
    }
}

/// Clipboard driven through the platform's copy tool
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandClipboard {
    forced: Option<Backend>,
}

impl CommandClipboard {
    /// Use `backend`, or detect one each time the clipboard is touched.
    /// Detection is deferred so commands that never copy don't need a
    /// clipboard at all.
    pub fn new(backend: Option<Backend>) -> Self {
        Self { forced: backend }
    }

    fn backend(&self) -> Result<Backend> {
        self.forced.or_else(Backend::detect).ok_or_else(|| {
            SecretsError::ClipboardUnavailable(
                "no clipboard tool found (install wl-clipboard, xclip or xsel)".to_string(),
            )
        })
    }
}

fn unavailable(backend: Backend, reason: impl std::fmt::Display) -> SecretsError {
    SecretsError::ClipboardUnavailable(format!("{}: {}", backend.name(), reason))
}

impl Clipboard for CommandClipboard {
    fn set(&self, contents: &[u8]) -> Result<()> {
        let backend = self.backend()?;

        // xclip and wl-copy fork to keep serving the selection; their
        // output must not hold our pipes open
        let mut child = Command::new(backend.program())
            .args(backend.copy_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => unavailable(backend, "command not found"),
                _ => unavailable(backend, e),
            })?;

        let status = feed_and_wait(&mut child, contents).map_err(|e| unavailable(backend, e))?;
        if !status.success() {
            return Err(unavailable(backend, format!("exited with {}", status)));
        }

        debug!(backend = backend.name(), "clipboard written");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let backend = self.backend()?;
        if backend != Backend::WlCopy {
            return self.set(b"");
        }

        let status = Command::new("wl-copy")
            .arg("--clear")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| unavailable(backend, e))?;
        if !status.success() {
            return Err(unavailable(backend, format!("exited with {}", status)));
        }
        Ok(())
    }
}

/// Write `contents` to the child's stdin, close it and wait for the exit.
/// The child is reaped on every path; a failed write kills it first.
fn feed_and_wait(child: &mut Child, contents: &[u8]) -> io::Result<ExitStatus> {
    // stdin is dropped at the end of the arm so the tool sees EOF
    let written = match child.stdin.take() {
        Some(mut stdin) => stdin.write_all(contents),
        None => Ok(()),
    };

    if let Err(e) = written {
        let _ = child.kill();
        let _ = child.wait();
        return Err(e);
    }

    child.wait()
}

/// Events recorded by [`MemoryClipboard`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardEvent {
    Set(Vec<u8>),
    Cleared,
}

/// In-process clipboard that remembers every write
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    contents: Vec<u8>,
    events: Vec<ClipboardEvent>,
    unavailable: bool,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn contents(&self) -> Vec<u8> {
        self.lock().contents.clone()
    }

    pub fn events(&self) -> Vec<ClipboardEvent> {
        self.lock().events.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A panicking test thread must not wedge the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self, contents: &[u8], event: ClipboardEvent) -> Result<()> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(SecretsError::ClipboardUnavailable(
                "memory clipboard disabled".to_string(),
            ));
        }
        state.contents = contents.to_vec();
        state.events.push(event);
        Ok(())
    }
}

impl Clipboard for MemoryClipboard {
    fn set(&self, contents: &[u8]) -> Result<()> {
        self.write(contents, ClipboardEvent::Set(contents.to_vec()))
    }

    fn clear(&self) -> Result<()> {
        self.write(b"", ClipboardEvent::Cleared)
    }
}
