use super::{run_with_deadline, CommandOutput, Connector, Credential, LocalSession, Session, SshTarget};
use crate::error::{Error, Result};
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

const BACKOFF_SECS: [u64; 3] = [0, 2, 5];

/// Connector backed by the system `ssh` binary (`sshpass -e ssh` for passwords).
#[derive(Debug, Clone)]
pub struct SystemConnector {
    max_attempts: u32,
}

impl Default for SystemConnector {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl SystemConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }
}

impl Connector for SystemConnector {
    fn connect(&self, target: &SshTarget) -> Result<Box<dyn Session>> {
        if is_local_host(&target.address) {
            log::debug!("Host '{}' is localhost; using local execution", target.host_id);
            return Ok(Box::new(LocalSession::new(
                &target.host_id,
                target.command_timeout,
            )));
        }

        let key = match &target.credential {
            Credential::PrivateKeyPem(pem) => Some(KeySource::Staged(stage_key(pem)?)),
            Credential::IdentityFile(path) => {
                let expanded = shellexpand::tilde(path).to_string();
                if !std::path::Path::new(&expanded).exists() {
                    return Err(Error::ssh_identity_file_not_found(
                        target.host_id.clone(),
                        expanded,
                    ));
                }
                Some(KeySource::File(expanded))
            }
            Credential::Password(_) => None,
        };

        Ok(Box::new(SshSession {
            target: target.clone(),
            key,
            max_attempts: self.max_attempts,
        }))
    }
}

enum KeySource {
    /// Removed from disk when the session drops.
    Staged(NamedTempFile),
    File(String),
}

impl KeySource {
    fn path(&self) -> String {
        match self {
            KeySource::Staged(file) => file.path().to_string_lossy().to_string(),
            KeySource::File(path) => path.clone(),
        }
    }
}

/// Write PEM text to a 0600 temp file. ssh refuses keys without a trailing newline.
fn stage_key(pem: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("datacenter-key-")
        .tempfile()
        .map_err(|e| Error::internal_io(e.to_string(), Some("stage private key".to_string())))?;

    let mut content = pem.trim().to_string();
    content.push('\n');
    file.write_all(content.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| Error::internal_io(e.to_string(), Some("stage private key".to_string())))?;

    Ok(file)
}

struct SshSession {
    target: SshTarget,
    key: Option<KeySource>,
    max_attempts: u32,
}

impl SshSession {
    fn build_args(&self, command: &str) -> Vec<String> {
        let target = &self.target;
        let mut args = Vec::new();

        if let Some(key) = &self.key {
            args.push("-i".to_string());
            args.push(key.path());
            args.extend(["-o".to_string(), "IdentitiesOnly=yes".to_string()]);
            args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
        } else {
            args.extend([
                "-o".to_string(),
                "PreferredAuthentications=password,keyboard-interactive".to_string(),
                "-o".to_string(),
                "PubkeyAuthentication=no".to_string(),
            ]);
        }

        if target.port != 22 {
            args.push("-p".to_string());
            args.push(target.port.to_string());
        }

        args.extend([
            "-o".to_string(),
            format!("ConnectTimeout={}", target.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
            "-o".to_string(),
            format!("StrictHostKeyChecking={}", target.strict_host_key_checking),
        ]);

        args.push(format!("{}@{}", target.user, target.address));
        args.push(command.to_string());
        args
    }

    fn build_command(&self, command: &str) -> Command {
        let args = self.build_args(command);
        match &self.target.credential {
            Credential::Password(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg("ssh").args(&args).env("SSHPASS", password);
                cmd
            }
            _ => {
                let mut cmd = Command::new("ssh");
                cmd.args(&args);
                cmd
            }
        }
    }

    fn execute_with_retry(&self, command: &str, input: Option<&[u8]>) -> Result<CommandOutput> {
        let host_id = &self.target.host_id;

        for attempt in 0..self.max_attempts {
            let output = run_with_deadline(
                self.build_command(command),
                input,
                self.target.command_timeout,
                host_id,
            )?;

            if output.success || !is_transient_ssh_error(&output) {
                return Ok(output);
            }

            if attempt + 1 >= self.max_attempts {
                return Err(Error::ssh_connect_failed(
                    host_id.clone(),
                    output.stderr.trim().to_string(),
                ));
            }

            let delay = BACKOFF_SECS
                .get(attempt as usize + 1)
                .copied()
                .unwrap_or(5);
            log::warn!(
                "Connection to '{}' failed (attempt {}/{}), retrying in {}s",
                host_id,
                attempt + 1,
                self.max_attempts,
                delay
            );
            std::thread::sleep(std::time::Duration::from_secs(delay));
        }

        Err(Error::ssh_connect_failed(host_id.clone(), "retry exhausted"))
    }
}

impl Session for SshSession {
    fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        self.execute_with_retry(command, None)
    }

    fn exec_with_input(&mut self, command: &str, input: &[u8]) -> Result<CommandOutput> {
        self.execute_with_retry(command, Some(input))
    }
}

/// Check if a host address refers to the local machine.
pub fn is_local_host(address: &str) -> bool {
    matches!(address, "localhost" | "127.0.0.1" | "::1")
}

/// Exit 255 is ssh's own failure code; remote commands exiting 255 are
/// only retried when stderr also looks like a connection-level failure.
fn is_transient_ssh_error(output: &CommandOutput) -> bool {
    if output.exit_code != 255 {
        return false;
    }
    let stderr = output.stderr.to_lowercase();

    let transient_patterns = [
        "connection refused",
        "connection reset",
        "connection timed out",
        "no route to host",
        "network is unreachable",
        "temporary failure in name resolution",
        "could not resolve hostname",
        "broken pipe",
        "ssh_exchange_identification",
        "connection closed by remote host",
    ];

    transient_patterns.iter().any(|p| stderr.contains(p))
}
