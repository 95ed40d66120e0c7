use clap::{Args, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};

use datacenter::application::ManagedApplication;
use datacenter::command::{self, Command, CommandExecution, OwnedTarget, TargetKind};
use datacenter::database::ManagedDatabase;
use datacenter::host::Host;
use datacenter::store::JsonStore;
use datacenter::Error;

use super::{keep, run_record, CmdResult, RecordCommand, RecordOutput};

#[derive(Args)]
pub struct CommandArgs {
    #[command(subcommand)]
    command: CommandCommand,
}

#[derive(Subcommand)]
enum CommandCommand {
    #[command(flatten)]
    Record(RecordCommand),
    /// Dispatch a command at one or more targets, in order
    Run {
        /// Command ID
        command_id: String,
        /// Target as <kind>:<id>, where kind is host, application or database
        #[arg(long = "target", required = true, value_name = "KIND:ID")]
        targets: Vec<String>,
        /// Extra substitution as key=value (JSON values are parsed)
        #[arg(long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,
    },
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum CommandOutput {
    Record(RecordOutput<Command>),
    Run(CommandRunOutput),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRunOutput {
    command: String,
    command_id: String,
    executions: Vec<CommandExecution>,
}

fn parse_kwargs(args: &[String]) -> datacenter::Result<Map<String, Value>> {
    let mut kwargs = Map::new();
    for arg in args {
        let (key, raw) = arg.split_once('=').ok_or_else(|| {
            Error::validation_invalid_argument(
                "arg",
                format!("Expected key=value, got '{}'", arg),
                None,
                None,
            )
        })?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        kwargs.insert(key.trim().to_string(), value);
    }
    Ok(kwargs)
}

/// Resolve one `--target`. A malformed spec is an argument error; a target
/// that cannot be loaded keeps its slot as a failure.
fn load_target(store: &JsonStore, spec: &str) -> datacenter::Result<OwnedTarget> {
    let (kind, id) = spec.split_once(':').ok_or_else(|| {
        Error::validation_invalid_argument(
            "target",
            format!("Expected <kind>:<id>, got '{}'", spec),
            None,
            None,
        )
    })?;

    let Ok(kind) = kind.parse::<TargetKind>() else {
        return Ok(OwnedTarget::Unsupported {
            kind: kind.to_string(),
            id: id.to_string(),
        });
    };

    Ok(load_kind(store, kind, id).unwrap_or_else(|error| OwnedTarget::Failed {
        kind: kind.as_str().to_string(),
        id: id.to_string(),
        error,
    }))
}

fn load_kind(store: &JsonStore, kind: TargetKind, id: &str) -> datacenter::Result<OwnedTarget> {
    Ok(match kind {
        TargetKind::Host => OwnedTarget::Host(store.load::<Host>(id)?),
        TargetKind::Application => {
            let app: ManagedApplication = store.load(id)?;
            let host: Host = store.load(app.host_id()?)?;
            OwnedTarget::Application { app, host }
        }
        TargetKind::Database => {
            let database: ManagedDatabase = store.load(id)?;
            let host = super::db::owning_host(store, &database)?;
            OwnedTarget::Database { database, host }
        }
    })
}

pub fn run(args: CommandArgs, global: &crate::commands::GlobalArgs) -> CmdResult<CommandOutput> {
    match args.command {
        CommandCommand::Record(command) => {
            let store = global.store()?;
            let (out, code) = run_record(&store, command, keep::<Command>)?;
            Ok((CommandOutput::Record(out), code))
        }
        CommandCommand::Run {
            command_id,
            targets,
            args,
        } => {
            let kwargs = parse_kwargs(&args)?;
            let (store, engine) = global.engine()?;
            let command: Command = store.load(&command_id)?;

            // Only malformed specs abort here; load failures become records.
            let mut loaded = targets
                .iter()
                .map(|spec| load_target(&store, spec))
                .collect::<datacenter::Result<Vec<_>>>()?;

            datacenter::log_status!(
                "command",
                "Dispatching '{}' to {} target(s)",
                command.display_name(),
                loaded.len()
            );
            let executions = command::dispatch_all(&engine, &command, &mut loaded, &kwargs);
            let exit_code = if executions.iter().all(CommandExecution::is_success) {
                0
            } else {
                20
            };

            Ok((
                CommandOutput::Run(CommandRunOutput {
                    command: "command.run".to_string(),
                    command_id,
                    executions,
                }),
                exit_code,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kwargs_parse_json_or_fall_back_to_text() {
        let kwargs = parse_kwargs(&[
            "port=8069".to_string(),
            "name=web one".to_string(),
            "opts={\"a\":1}".to_string(),
        ])
        .unwrap();
        assert_eq!(kwargs["port"], 8069);
        assert_eq!(kwargs["name"], "web one");
        assert_eq!(kwargs["opts"]["a"], 1);
        assert!(parse_kwargs(&["novalue".to_string()]).is_err());
    }

    #[test]
    fn unknown_kind_becomes_unsupported_slot() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        match load_target(&store, "printer:p1").unwrap() {
            OwnedTarget::Unsupported { kind, id } => {
                assert_eq!(kind, "printer");
                assert_eq!(id, "p1");
            }
            _ => panic!("expected unsupported target"),
        }
        assert!(load_target(&store, "no-colon").is_err());
    }

    #[test]
    fn missing_targets_keep_their_place_in_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        store
            .create::<Host>(r#"{"id": "web-1", "address": "10.0.0.5", "user": "odoo"}"#)
            .unwrap();
        store
            .create::<ManagedApplication>(r#"{"id": "erp"}"#)
            .unwrap();

        let loaded: Vec<OwnedTarget> = ["host:web-1", "host:nope", "app:erp"]
            .iter()
            .map(|spec| load_target(&store, spec).unwrap())
            .collect();

        assert!(matches!(&loaded[0], OwnedTarget::Host(h) if h.id == "web-1"));
        match &loaded[1] {
            OwnedTarget::Failed { kind, id, error } => {
                assert_eq!(kind, "host");
                assert_eq!(id, "nope");
                assert_eq!(error.code.as_str(), "host.not_found");
            }
            _ => panic!("expected failed slot"),
        }
        match &loaded[2] {
            OwnedTarget::Failed { kind, error, .. } => {
                assert_eq!(kind, "application");
                assert_eq!(error.code.as_str(), "config.missing_key");
            }
            _ => panic!("expected failed slot"),
        }
    }
}
