use clap::{Args, Subcommand};
use serde::Serialize;

use datacenter::host::{self, ExecOutcome, Host, HostState};

use super::{run_record, CmdResult, RecordCommand, RecordOutput};

#[derive(Args)]
pub struct HostArgs {
    #[command(subcommand)]
    command: HostCommand,
}

#[derive(Subcommand)]
enum HostCommand {
    #[command(flatten)]
    Record(RecordCommand),
    /// Run a command on the host (reruns the last command when none is given)
    Exec {
        /// Host ID
        host_id: String,
        /// Command text, may contain %[...] tokens
        #[arg(long, short)]
        command: Option<String>,
        /// Directory to run in (defaults to the host base path)
        #[arg(long)]
        base_path: Option<String>,
        /// Run even if the host has a command in flight
        #[arg(long)]
        force: bool,
    },
    /// Write a file on the host
    Upload {
        /// Host ID
        host_id: String,
        /// Destination path on the host
        remote_path: String,
        /// Local file to send
        #[arg(long, conflicts_with = "content")]
        file: Option<String>,
        /// Literal content to send
        #[arg(long)]
        content: Option<String>,
        /// Mark the uploaded file executable
        #[arg(long)]
        executable: bool,
    },
    /// Clear a stuck pending state
    Reset {
        /// Host ID
        host_id: String,
    },
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum HostOutput {
    Record(RecordOutput<Host>),
    Action(HostActionOutput),
}

#[derive(Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostActionOutput {
    command: String,
    host_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<HostState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    busy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reset: Option<bool>,
}

pub fn run(args: HostArgs, global: &crate::commands::GlobalArgs) -> CmdResult<HostOutput> {
    match args.command {
        HostCommand::Record(command) => {
            let store = global.store()?;
            let (out, code) = run_record(&store, command, Host::redacted)?;
            Ok((HostOutput::Record(out), code))
        }
        HostCommand::Exec {
            host_id,
            command,
            base_path,
            force,
        } => {
            let (store, engine) = global.engine()?;
            let mut host: Host = store.load(&host_id)?;

            let outcome = host::execute(
                &engine,
                &mut host,
                command.as_deref(),
                base_path.as_deref(),
                force,
            )?;
            let exit_code = match outcome {
                ExecOutcome::Success { .. } => 0,
                ExecOutcome::Failure { .. } | ExecOutcome::Busy => 20,
            };

            Ok((
                HostOutput::Action(HostActionOutput {
                    command: "host.exec".to_string(),
                    host_id,
                    state: Some(host.state),
                    command_text: host.last_command.clone(),
                    stdout: Some(host.last_stdout.clone()),
                    stderr: Some(host.last_stderr.clone()),
                    error_count: Some(host.error_count),
                    busy: Some(outcome.is_busy()),
                    ..Default::default()
                }),
                exit_code,
            ))
        }
        HostCommand::Upload {
            host_id,
            remote_path,
            file,
            content,
            executable,
        } => {
            let bytes = match (file, content) {
                (Some(path), _) => std::fs::read(&path).map_err(|e| {
                    datacenter::Error::internal_io(e.to_string(), Some(format!("read {}", path)))
                })?,
                (None, Some(content)) => content.into_bytes(),
                (None, None) => {
                    return Err(datacenter::Error::validation_missing_argument(vec![
                        "--file".to_string(),
                        "--content".to_string(),
                    ]))
                }
            };

            let (store, engine) = global.engine()?;
            let host: Host = store.load(&host_id)?;
            datacenter::log_status!("upload", "Writing {} bytes to {}", bytes.len(), remote_path);
            let path = host::upload(&engine, &host, &remote_path, &bytes, executable)?;

            Ok((
                HostOutput::Action(HostActionOutput {
                    command: "host.upload".to_string(),
                    host_id,
                    path: Some(path),
                    ..Default::default()
                }),
                0,
            ))
        }
        HostCommand::Reset { host_id } => {
            let store = global.store()?;
            let mut host: Host = store.load(&host_id)?;
            let changed = host.reset();
            if changed {
                store.save(&host)?;
            }

            Ok((
                HostOutput::Action(HostActionOutput {
                    command: "host.reset".to_string(),
                    host_id,
                    state: Some(host.state),
                    reset: Some(changed),
                    ..Default::default()
                }),
                0,
            ))
        }
    }
}
