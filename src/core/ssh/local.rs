use super::{run_with_deadline, CommandOutput, Session};
use crate::error::Result;
use std::process::Command;
use std::time::Duration;

/// Session for hosts that are the controlling machine itself.
pub struct LocalSession {
    host_id: String,
    timeout: Duration,
}

impl LocalSession {
    pub fn new(host_id: &str, timeout: Duration) -> Self {
        Self {
            host_id: host_id.to_string(),
            timeout,
        }
    }

    fn shell(command: &str) -> Command {
        #[cfg(windows)]
        let cmd = {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command]);
            cmd
        };

        #[cfg(not(windows))]
        let cmd = {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        };

        cmd
    }
}

impl Session for LocalSession {
    fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        run_with_deadline(Self::shell(command), None, self.timeout, &self.host_id)
    }

    fn exec_with_input(&mut self, command: &str, input: &[u8]) -> Result<CommandOutput> {
        run_with_deadline(Self::shell(command), Some(input), self.timeout, &self.host_id)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn write_file_goes_through_cat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("it's here.sh");
        let mut session = LocalSession::new("local", Duration::from_secs(5));

        session
            .write_file(&path.to_string_lossy(), b"#!/bin/sh\necho hi\n")
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "#!/bin/sh\necho hi\n");
    }

    #[test]
    fn write_into_missing_directory_fails() {
        let mut session = LocalSession::new("local", Duration::from_secs(5));
        let err = session
            .write_file("/nonexistent-datacenter-dir/x.sh", b"x")
            .unwrap_err();
        assert_eq!(err.code.as_str(), "remote.upload_failed");
    }
}
