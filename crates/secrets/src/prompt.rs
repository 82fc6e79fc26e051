//! Hidden terminal input for secret values and passwords

use std::io::{self, BufRead};

use age::secrecy::{ExposeSecret, SecretString};

/// Ask for a value twice until both entries match.
///
/// `read` shows a prompt and returns one hidden line; `notice` reports an
/// empty entry or a mismatch, after which both prompts are shown again.
/// There is no retry limit. Only an error from `read` ends the loop
/// (rpassword reports EOF as `UnexpectedEof`).
pub fn read_confirmed<R, N>(label: &str, mut read: R, mut notice: N) -> io::Result<SecretString>
where
    R: FnMut(&str) -> io::Result<String>,
    N: FnMut(&str),
{
    loop {
        let first = SecretString::new(read(&format!("Enter {}: ", label))?);
        if first.expose_secret().is_empty() {
            notice(&format!("{} cannot be empty, try again", capitalize(label)));
            continue;
        }

        let second = SecretString::new(read(&format!("Confirm {}: ", label))?);
        if first.expose_secret() == second.expose_secret() {
            return Ok(first);
        }

        notice(&format!("{}s do not match, try again", capitalize(label)));
    }
}

/// Prompt on the terminal with echo off
pub fn read_hidden(prompt: &str) -> io::Result<String> {
    rpassword::prompt_password(prompt)
}

/// Read a password from the first line of `input` (for `--password-stdin`)
pub fn read_password_line(mut input: impl BufRead) -> io::Result<SecretString> {
    let mut line = String::new();
    input.read_line(&mut line)?;

    let trimmed = line.trim_end_matches(&['\n', '\r'][..]).len();
    line.truncate(trimmed);
    let password = SecretString::new(line);

    if password.expose_secret().is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "no password on stdin"));
    }
    Ok(password)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
