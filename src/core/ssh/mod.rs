//! Remote shell transport.
//!
//! A [`Connector`] opens a [`Session`] for an [`SshTarget`]. The production
//! connector drives the system `ssh` binary; hosts addressed as localhost run
//! through `sh -c` with the same capture and deadline semantics.

mod client;
mod local;

pub use client::{is_local_host, SystemConnector};
pub use local::LocalSession;

use crate::error::{Error, Result};
use crate::utils::shell;
use std::fmt;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
            exit_code: 0,
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
            exit_code,
        }
    }
}

/// Resolved authentication material for one connection.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// PEM text, staged to a private temp file while the session lives.
    PrivateKeyPem(String),
    /// Path to a key file on the controlling machine.
    IdentityFile(String),
    Password(String),
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::PrivateKeyPem(_) => "private_key",
            Credential::IdentityFile(_) => "identity_file",
            Credential::Password(_) => "password",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::IdentityFile(path) => f.debug_tuple("IdentityFile").field(path).finish(),
            other => write!(f, "{}(<redacted>)", other.kind()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host_id: String,
    pub address: String,
    pub port: u16,
    pub user: String,
    pub credential: Credential,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub strict_host_key_checking: String,
}

/// An open channel to one host.
pub trait Session {
    /// Run `command` to completion. `Err` means the transport itself failed;
    /// a command that ran and exited non-zero is an `Ok` with `success == false`.
    fn exec(&mut self, command: &str) -> Result<CommandOutput>;

    fn exec_with_input(&mut self, command: &str, input: &[u8]) -> Result<CommandOutput>;

    fn write_file(&mut self, path: &str, content: &[u8]) -> Result<()> {
        let command = format!("cat > {}", shell::quote_path(path));
        let output = self.exec_with_input(&command, content)?;
        if !output.success {
            let detail = if output.stderr.trim().is_empty() {
                format!("exit code {}", output.exit_code)
            } else {
                output.stderr
            };
            return Err(Error::remote_upload_failed(path, detail));
        }
        Ok(())
    }
}

pub trait Connector: Send + Sync {
    fn connect(&self, target: &SshTarget) -> Result<Box<dyn Session>>;
}

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Spawn `cmd`, feed `input`, and capture both streams until exit or `timeout`.
///
/// On expiry the child is killed and `remote.command_timeout` is returned.
pub(crate) fn run_with_deadline(
    mut cmd: Command,
    input: Option<&[u8]>,
    timeout: Duration,
    host_id: &str,
) -> Result<CommandOutput> {
    cmd.stdin(if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let program = cmd.get_program().to_string_lossy().to_string();
    let mut child = cmd.spawn().map_err(|e| {
        Error::ssh_connect_failed(host_id, format!("failed to start {}: {}", program, e))
    })?;

    let writer = match (input, child.stdin.take()) {
        (Some(bytes), Some(mut stdin)) => {
            let bytes = bytes.to_vec();
            Some(std::thread::spawn(move || {
                // The remote side may exit early; a broken pipe surfaces through its exit code.
                let _ = stdin.write_all(&bytes);
            }))
        }
        _ => None,
    };

    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                log::warn!(
                    "Command on '{}' exceeded {}s deadline; killed",
                    host_id,
                    timeout.as_secs()
                );
                return Err(Error::remote_command_timeout(host_id, timeout.as_secs()));
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => {
                return Err(Error::internal_io(
                    e.to_string(),
                    Some(format!("wait for {}", program)),
                ))
            }
        }
    };

    if let Some(handle) = writer {
        let _ = handle.join();
    }

    Ok(CommandOutput {
        stdout: join_reader(stdout_reader),
        stderr: join_reader(stderr_reader),
        success: status.success(),
        exit_code: status.code().unwrap_or(-1),
    })
}

fn spawn_reader<R: Read + Send + 'static>(mut stream: R) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<std::thread::JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_hides_secrets() {
        let rendered = format!("{:?}", Credential::Password("hunter2".to_string()));
        assert!(!rendered.contains("hunter2"));

        let rendered = format!("{:?}", Credential::PrivateKeyPem("-----BEGIN".to_string()));
        assert!(!rendered.contains("BEGIN"));
    }

    #[cfg(unix)]
    #[test]
    fn deadline_kills_slow_commands() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5"]);
        let started = Instant::now();
        let err = run_with_deadline(cmd, None, Duration::from_millis(200), "local").unwrap_err();
        assert_eq!(err.code.as_str(), "remote.command_timeout");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn captures_streams_and_input() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "cat; echo oops >&2; exit 3"]);
        let out = run_with_deadline(cmd, Some(b"hello"), Duration::from_secs(5), "local").unwrap();
        assert_eq!(out.stdout, "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert!(!out.success);
        assert_eq!(out.exit_code, 3);
    }
}
