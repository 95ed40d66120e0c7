//! Named command templates dispatched at hosts, applications or databases.

use crate::application::{self, ManagedApplication};
use crate::config::ConfigEntity;
use crate::database::{self, ManagedDatabase};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::host::{self, ExecOutcome, Host, BUSY_MESSAGE};
use crate::sigil::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Host,
    Application,
    Database,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Host => "host",
            TargetKind::Application => "application",
            TargetKind::Database => "database",
        }
    }
}

impl FromStr for TargetKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "host" | "server" => Ok(TargetKind::Host),
            "application" | "app" => Ok(TargetKind::Application),
            "database" | "db" => Ok(TargetKind::Database),
            other => Err(Error::validation_invalid_argument(
                "target",
                format!("Unknown target kind '{}'", other),
                None,
                Some(vec![
                    "host".to_string(),
                    "application".to_string(),
                    "database".to_string(),
                ]),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    #[serde(skip_deserializing, default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(alias = "commandText")]
    pub text: String,
    /// Restricts the command to one kind of target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_kind: Option<TargetKind>,
}

impl Command {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            text: text.into(),
            target_kind: None,
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

impl ConfigEntity for Command {
    fn id(&self) -> &str {
        &self.id
    }
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
    fn dir_name() -> &'static str {
        "commands"
    }
    fn entity_type() -> &'static str {
        "command"
    }
    fn not_found_error(id: String, suggestions: Vec<String>) -> Error {
        Error::command_not_found(id, suggestions)
    }
    fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(Error::config_missing_key("text", Some(self.id.clone())));
        }
        Ok(())
    }
}

/// What a command runs against. Applications run on their owning host.
pub enum Target<'a> {
    Host(&'a mut Host),
    Application {
        app: &'a mut ManagedApplication,
        host: &'a mut Host,
    },
    Database {
        database: &'a ManagedDatabase,
        host: Option<&'a Host>,
    },
}

impl Target<'_> {
    pub fn kind(&self) -> TargetKind {
        match self {
            Target::Host(_) => TargetKind::Host,
            Target::Application { .. } => TargetKind::Application,
            Target::Database { .. } => TargetKind::Database,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Target::Host(host) => &host.id,
            Target::Application { app, .. } => &app.id,
            Target::Database { database, .. } => &database.id,
        }
    }

    fn template_value(&self, engine: &Engine) -> Value {
        match self {
            Target::Host(host) => host.template_value(),
            Target::Application { app, host } => {
                app.template_value(host, &engine.settings().application)
            }
            Target::Database { database, .. } => database.template_value(),
        }
    }
}

/// Loaded targets for batch dispatch. `Unsupported` keeps a slot for a
/// target whose kind could not be recognized, `Failed` for one that could
/// not be loaded.
pub enum OwnedTarget {
    Host(Host),
    Application {
        app: ManagedApplication,
        host: Host,
    },
    Database {
        database: ManagedDatabase,
        host: Option<Host>,
    },
    Unsupported {
        kind: String,
        id: String,
    },
    Failed {
        kind: String,
        id: String,
        error: Error,
    },
}

impl OwnedTarget {
    pub fn as_target(&mut self) -> Option<Target<'_>> {
        match self {
            OwnedTarget::Host(host) => Some(Target::Host(host)),
            OwnedTarget::Application { app, host } => Some(Target::Application { app, host }),
            OwnedTarget::Database { database, host } => Some(Target::Database {
                database,
                host: host.as_ref(),
            }),
            OwnedTarget::Unsupported { .. } | OwnedTarget::Failed { .. } => None,
        }
    }

    fn target_ref(&self) -> TargetRef {
        let (kind, id) = match self {
            OwnedTarget::Host(host) => (TargetKind::Host.as_str(), host.id.as_str()),
            OwnedTarget::Application { app, .. } => {
                (TargetKind::Application.as_str(), app.id.as_str())
            }
            OwnedTarget::Database { database, .. } => {
                (TargetKind::Database.as_str(), database.id.as_str())
            }
            OwnedTarget::Unsupported { kind, id } | OwnedTarget::Failed { kind, id, .. } => {
                (kind.as_str(), id.as_str())
            }
        };
        TargetRef {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Success,
    Failure,
    Busy,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetRef {
    pub kind: String,
    pub id: String,
}

/// One command applied to one target. Returned to the caller, never stored.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandExecution {
    pub id: Uuid,
    pub command_name: String,
    pub target: TargetRef,
    pub command_text: String,
    pub output: String,
    pub errors: String,
    pub state: ExecutionState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CommandExecution {
    fn begin(command: &Command, target: TargetRef) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            command_name: command.display_name().to_string(),
            target,
            command_text: String::new(),
            output: String::new(),
            errors: String::new(),
            state: ExecutionState::Failure,
            started_at: now,
            finished_at: now,
        }
    }

    fn finish(mut self, state: ExecutionState, output: String, errors: String) -> Self {
        self.state = state;
        self.output = output;
        self.errors = errors;
        self.finished_at = Utc::now();
        self
    }

    pub fn is_success(&self) -> bool {
        self.state == ExecutionState::Success
    }
}

fn from_outcome(execution: CommandExecution, outcome: ExecOutcome) -> CommandExecution {
    match outcome {
        ExecOutcome::Busy => {
            execution.finish(ExecutionState::Busy, String::new(), BUSY_MESSAGE.to_string())
        }
        ExecOutcome::Success { stdout, stderr } => {
            execution.finish(ExecutionState::Success, stdout, stderr)
        }
        ExecOutcome::Failure { stdout, stderr } => {
            execution.finish(ExecutionState::Failure, stdout, stderr)
        }
    }
}

/// Resolve `command` against the target (with `kwargs` as the innermost scope)
/// and run it. Configuration problems are returned as `Err`; remote failures
/// are recorded in the execution.
pub fn dispatch(
    engine: &Engine,
    command: &Command,
    target: Target<'_>,
    kwargs: &Map<String, Value>,
) -> Result<CommandExecution> {
    let target_ref = TargetRef {
        kind: target.kind().as_str().to_string(),
        id: target.id().to_string(),
    };
    let mut execution = CommandExecution::begin(command, target_ref);

    if let Some(kind) = command.target_kind {
        if kind != target.kind() {
            let message = format!(
                "Command '{}' runs on {} targets, not {} '{}'",
                command.display_name(),
                kind.as_str(),
                target.kind().as_str(),
                target.id()
            );
            return Ok(execution.finish(ExecutionState::Unsupported, String::new(), message));
        }
    }

    let context = Context::from_owned(target.template_value(engine))
        .with_owned_scope(Value::Object(kwargs.clone()));
    let resolved = engine.interpolator().resolve(&command.text, &context);
    execution.command_text = resolved.clone();

    log::debug!(
        "Dispatching '{}' to {} '{}'",
        command.display_name(),
        execution.target.kind,
        execution.target.id
    );

    match target {
        Target::Host(host) => {
            let outcome = host::execute(engine, host, Some(&resolved), None, false)?;
            Ok(from_outcome(execution, outcome))
        }
        Target::Application { app, host } => {
            application::ensure_host(app, host)?;
            let base = app.base_path(host, &engine.settings().application);
            let outcome = host::execute(engine, host, Some(&resolved), Some(&base), false)?;
            Ok(from_outcome(execution, outcome))
        }
        Target::Database { database, host } => {
            let endpoint = database.endpoint(host, &engine.settings().database)?;
            let report = database::run_batch(engine, &endpoint, &resolved)?;
            let message = report.message();
            Ok(if report.is_success() {
                execution.finish(ExecutionState::Success, message, String::new())
            } else {
                execution.finish(ExecutionState::Failure, String::new(), message)
            })
        }
    }
}

/// Run `command` over every target in order. Each target yields exactly one
/// execution; errors become failure records instead of aborting the batch.
pub fn dispatch_all(
    engine: &Engine,
    command: &Command,
    targets: &mut [OwnedTarget],
    kwargs: &Map<String, Value>,
) -> Vec<CommandExecution> {
    targets
        .iter_mut()
        .map(|owned| {
            let target_ref = owned.target_ref();
            if let OwnedTarget::Failed { error, .. } = owned {
                log::debug!(
                    "Skipping {} '{}': {}",
                    target_ref.kind,
                    target_ref.id,
                    error
                );
                let message = error.message.clone();
                return CommandExecution::begin(command, target_ref).finish(
                    ExecutionState::Failure,
                    String::new(),
                    message,
                );
            }
            match owned.as_target() {
                None => {
                    let message = format!("Unsupported target kind '{}'", target_ref.kind);
                    CommandExecution::begin(command, target_ref).finish(
                        ExecutionState::Unsupported,
                        String::new(),
                        message,
                    )
                }
                Some(target) => match dispatch(engine, command, target, kwargs) {
                    Ok(execution) => execution,
                    Err(err) => {
                        log::debug!(
                            "Dispatch to {} '{}' failed: {}",
                            target_ref.kind,
                            target_ref.id,
                            err
                        );
                        CommandExecution::begin(command, target_ref).finish(
                            ExecutionState::Failure,
                            String::new(),
                            err.message,
                        )
                    }
                },
            }
        })
        .collect()
}
