use clap::{Args, Subcommand};
use serde::Serialize;

use datacenter::application::{self, AppStatus, ManagedApplication};
use datacenter::host::{Host, HostState};

use super::{keep, run_record, CmdResult, RecordCommand, RecordOutput};

#[derive(Args)]
pub struct AppArgs {
    #[command(subcommand)]
    command: AppCommand,
}

#[derive(Subcommand)]
enum AppCommand {
    #[command(flatten)]
    Record(RecordCommand),
    /// Start the service
    Start { app_id: String },
    /// Stop the service
    Stop { app_id: String },
    /// Restart the service
    Restart { app_id: String },
    /// Check whether the service is running
    Status { app_id: String },
    /// Show recent service logs
    Journal { app_id: String },
    /// Stage and run the install script
    Install { app_id: String },
    /// Stage and run the update script
    Update { app_id: String },
    /// Stage and run the uninstall script (the service must be stopped)
    Uninstall { app_id: String },
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum AppOutput {
    Record(RecordOutput<ManagedApplication>),
    Action(AppActionOutput),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppActionOutput {
    command: String,
    app_id: String,
    host_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<AppStatus>,
    expected_status: AppStatus,
    host_state: HostState,
    message: String,
}

type Action = fn(
    &datacenter::engine::Engine,
    &mut ManagedApplication,
    &mut Host,
) -> datacenter::Result<String>;

pub fn run(args: AppArgs, global: &crate::commands::GlobalArgs) -> CmdResult<AppOutput> {
    let (name, app_id, action): (&str, String, Option<Action>) = match args.command {
        AppCommand::Record(command) => {
            let store = global.store()?;
            let (out, code) = run_record(&store, command, keep::<ManagedApplication>)?;
            return Ok((AppOutput::Record(out), code));
        }
        AppCommand::Start { app_id } => ("start", app_id, Some(application::start)),
        AppCommand::Stop { app_id } => ("stop", app_id, Some(application::stop)),
        AppCommand::Restart { app_id } => ("restart", app_id, Some(application::restart)),
        AppCommand::Journal { app_id } => ("journal", app_id, Some(application::journal)),
        AppCommand::Install { app_id } => ("install", app_id, Some(application::install)),
        AppCommand::Update { app_id } => ("update", app_id, Some(application::update)),
        AppCommand::Uninstall { app_id } => ("uninstall", app_id, Some(application::uninstall)),
        AppCommand::Status { app_id } => ("status", app_id, None),
    };

    let (store, engine) = global.engine()?;
    let mut app: ManagedApplication = store.load(&app_id)?;
    let mut host: Host = store.load(app.host_id()?)?;

    datacenter::log_status!("app", "{} '{}' on '{}'", name, app.id, host.id);

    let (status, message) = match action {
        Some(action) => (None, action(&engine, &mut app, &mut host)?),
        None => {
            let observed = application::status(&engine, &mut app, &mut host)?;
            (Some(observed), app.last_message.clone())
        }
    };

    let exit_code = if host.state == HostState::Failure { 20 } else { 0 };

    Ok((
        AppOutput::Action(AppActionOutput {
            command: format!("app.{}", name),
            app_id,
            host_id: host.id.clone(),
            status,
            expected_status: app.expected_status,
            host_state: host.state,
            message,
        }),
        exit_code,
    ))
}
