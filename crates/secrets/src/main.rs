//! secrets - Personal secrets store for Daedalos
//!
//! Commands:
//! - list: List stored secret names
//! - get <NAME>: Copy a secret to the clipboard, cleared after a timeout
//! - set <NAME>: Store a new secret (prompts for value and password)
//! - delete <NAME>: Delete a secret
//! - clear: Clear the clipboard now
//! - status: Show whether a secret is in the clipboard

use std::io;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use age::secrecy::{ExposeSecret, SecretString};
use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use secrets::prompt::{read_confirmed, read_hidden, read_password_line};
use secrets::session::CLEAR_SUBCOMMAND;
use secrets::{ClearScheduler, Config, ExposureState, SecretService, SecretsError};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "secrets")]
#[command(about = "Personal secrets store for Daedalos - encrypted at rest, copied to the clipboard on demand")]
#[command(version)]
#[command(after_help = r#"STORAGE:
    One age-encrypted file per secret in ~/.secrets (override with SECRETS_DIR)
    Settings in ~/.config/daedalos/secrets.json

CLIPBOARD:
    'get' copies the secret and clears the clipboard after 30 seconds
    (clipboard_ttl_secs / SECRETS_CLIPBOARD_TTL). Copying another secret
    restarts the window.

SECURITY:
    - Each secret has its own password (scrypt + ChaCha20-Poly1305)
    - Plaintext is never printed, logged or written to disk
    - 'delete' unlinks the file; it does not overwrite it"#)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored secret names
    List {
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Copy a secret to the clipboard
    Get {
        /// Secret name
        name: String,
        /// Read the password from the first line of stdin
        #[arg(long)]
        password_stdin: bool,
    },

    /// Store a new secret (prompts for the value and its password)
    Set {
        /// Secret name
        name: String,
    },

    /// Delete a secret permanently
    Delete {
        /// Secret name
        name: String,
    },

    /// Clear the clipboard now and cancel the pending clear
    Clear,

    /// Show whether a secret is in the clipboard
    Status,

    /// Scheduled clipboard clear (spawned by 'get')
    #[command(name = "clipboard-clear", hide = true)]
    ClipboardClear {
        #[arg(long)]
        generation: u64,
        /// Seconds to wait before clearing
        #[arg(long)]
        after: u64,
    },
}

fn main() -> ExitCode {
    // Initialize logging (stderr keeps stdout clean for scripts)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let config = Config::resolve().context("Failed to load configuration")?;

    if let Commands::ClipboardClear { generation, after } = command {
        return cmd_clipboard_clear(&config, generation, after);
    }

    let program = std::env::current_exe().context("Failed to locate the secrets binary")?;
    let service = secrets::open_service(&config, ClearScheduler::Detached { program })?;

    match command {
        Commands::List { json } => cmd_list(&service, json),
        Commands::Get {
            name,
            password_stdin,
        } => cmd_get(&service, &name, password_stdin),
        Commands::Set { name } => cmd_set(&service, &name),
        Commands::Delete { name } => cmd_delete(&service, &name),
        Commands::Clear => cmd_clear(&service),
        Commands::Status => cmd_status(&service),
        Commands::ClipboardClear { .. } => unreachable!("handled above"),
    }
}

/// List all secrets, one per line
fn cmd_list(service: &SecretService, json: bool) -> Result<()> {
    let names = service.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&names)?);
        return Ok(());
    }

    if names.is_empty() {
        eprintln!("No secrets stored. Add one with: secrets set <name>");
        return Ok(());
    }

    for name in &names {
        println!("{}", name);
    }

    Ok(())
}

/// Copy a secret to the clipboard
fn cmd_get(service: &SecretService, name: &str, password_stdin: bool) -> Result<()> {
    // Fail on a missing secret before asking for a password
    if !service.store().exists(name)? {
        bail!(SecretsError::NotFound(name.to_string()));
    }

    let password = if password_stdin {
        read_password_line(io::stdin().lock()).context("Failed to read password")?
    } else {
        SecretString::new(read_hidden("Password: ").context("Failed to read password")?)
    };

    let exposure = service.get(name, &password)?;

    println!(
        "Copied {} to clipboard. Clearing in {}s.",
        name,
        exposure.ttl.as_secs()
    );

    Ok(())
}

/// Store a secret
fn cmd_set(service: &SecretService, name: &str) -> Result<()> {
    // Fail on a taken name before prompting
    if service.store().exists(name)? {
        bail!(SecretsError::AlreadyExists(name.to_string()));
    }

    let notice = |msg: &str| eprintln!("{}", msg);
    let value = read_confirmed("secret value", read_hidden, notice)
        .context("Failed to read secret value")?;
    let password =
        read_confirmed("password", read_hidden, notice).context("Failed to read password")?;

    service.set(name, value.expose_secret().as_bytes(), &password)?;

    println!("success: Secret stored: {}", name);

    Ok(())
}

/// Delete a secret
fn cmd_delete(service: &SecretService, name: &str) -> Result<()> {
    service.delete(name)?;
    println!("success: Secret deleted: {}", name);
    Ok(())
}

/// Clear the clipboard now
fn cmd_clear(service: &SecretService) -> Result<()> {
    service.clear_clipboard()?;
    println!("success: Clipboard cleared");
    Ok(())
}

/// Show the clipboard exposure state
fn cmd_status(service: &SecretService) -> Result<()> {
    match service.clipboard_state()? {
        ExposureState::Idle => println!("Clipboard: no secret"),
        ExposureState::Exposed { expires_at, .. } => {
            let remaining = (expires_at - chrono::Utc::now()).num_seconds().max(0);
            println!(
                "Clipboard: holding a secret until {} ({}s left)",
                expires_at.with_timezone(&Local).format("%H:%M:%S"),
                remaining
            );
        }
    }
    Ok(())
}

/// Body of the detached timer spawned by 'get'
fn cmd_clipboard_clear(config: &Config, generation: u64, after: u64) -> Result<()> {
    thread::sleep(Duration::from_secs(after));

    // clear_if_current never schedules, so the scheduler choice is moot
    let session = secrets::clipboard_session(config, ClearScheduler::Thread)?;
    session.clear_if_current(generation)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        let cli = Cli::try_parse_from(["secrets", "list"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::List { json: false })));

        let cli = Cli::try_parse_from(["secrets", "get", "db"]).unwrap();
        if let Some(Commands::Get {
            name,
            password_stdin,
        }) = cli.command
        {
            assert_eq!(name, "db");
            assert!(!password_stdin);
        } else {
            panic!("Expected Get command");
        }

        let cli = Cli::try_parse_from(["secrets", "set", "db"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Set { name }) if name == "db"));

        let cli = Cli::try_parse_from(["secrets", "delete", "db"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Delete { name }) if name == "db"));
    }

    #[test]
    fn test_no_args_is_not_an_error() {
        let cli = Cli::try_parse_from(["secrets"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_help_exits_cleanly() {
        for args in [&["secrets", "--help"][..], &["secrets", "help"][..]] {
            let err = Cli::try_parse_from(args).err().unwrap();
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }

    #[test]
    fn test_unknown_command_is_named() {
        let err = Cli::try_parse_from(["secrets", "frobnicate"]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        assert!(err.to_string().contains("frobnicate"));
    }

    #[test]
    fn test_hidden_clear_command() {
        let cli = Cli::try_parse_from([
            "secrets",
            CLEAR_SUBCOMMAND,
            "--generation",
            "7",
            "--after",
            "30",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::ClipboardClear {
                generation: 7,
                after: 30
            })
        ));

        let help = Cli::command().render_help().to_string();
        assert!(!help.contains(CLEAR_SUBCOMMAND));
    }

    #[test]
    fn test_get_password_stdin_flag() {
        let cli = Cli::try_parse_from(["secrets", "get", "--password-stdin", "db"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Get { password_stdin: true, .. })
        ));
    }
}
