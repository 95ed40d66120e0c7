use clap::{Args, Subcommand};
use serde::Serialize;

use datacenter::database::{self, ManagedDatabase};
use datacenter::host::Host;
use datacenter::store::JsonStore;

use super::{keep, run_record, CmdResult, RecordCommand, RecordOutput};

#[derive(Args)]
pub struct DbArgs {
    #[command(subcommand)]
    command: DbCommand,
}

#[derive(Subcommand)]
enum DbCommand {
    #[command(flatten)]
    Record(RecordCommand),
    /// Run a semicolon-separated SQL batch
    Run {
        /// Database ID
        db_id: String,
        /// SQL text
        #[arg(long, conflicts_with = "file")]
        sql: Option<String>,
        /// File containing SQL
        #[arg(long)]
        file: Option<String>,
    },
    /// Run the database's configured setup script
    Setup {
        /// Database ID
        db_id: String,
    },
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum DbOutput {
    Record(RecordOutput<ManagedDatabase>),
    Run(DbRunOutput),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbRunOutput {
    command: String,
    db_id: String,
    statements: usize,
    failed: usize,
    result: String,
}

/// The host a database falls back to for its address: its own, else its application's.
pub(crate) fn owning_host(store: &JsonStore, db: &ManagedDatabase) -> datacenter::Result<Option<Host>> {
    if let Some(host_id) = db.host_id.as_deref() {
        return store.load::<Host>(host_id).map(Some);
    }
    if let Some(app_id) = db.application_id.as_deref() {
        let app: datacenter::application::ManagedApplication = store.load(app_id)?;
        if let Some(host_id) = app.host_id.as_deref() {
            return store.load::<Host>(host_id).map(Some);
        }
    }
    Ok(None)
}

pub fn run(args: DbArgs, global: &crate::commands::GlobalArgs) -> CmdResult<DbOutput> {
    let (name, db_id, sql) = match args.command {
        DbCommand::Record(command) => {
            let store = global.store()?;
            let (out, code) = run_record(&store, command, keep::<ManagedDatabase>)?;
            return Ok((DbOutput::Record(out), code));
        }
        DbCommand::Run { db_id, sql, file } => {
            let sql = match (sql, file) {
                (Some(sql), _) => sql,
                (None, Some(path)) => std::fs::read_to_string(&path).map_err(|e| {
                    datacenter::Error::internal_io(e.to_string(), Some(format!("read {}", path)))
                })?,
                (None, None) => {
                    return Err(datacenter::Error::validation_missing_argument(vec![
                        "--sql".to_string(),
                        "--file".to_string(),
                    ]))
                }
            };
            ("run", db_id, Some(sql))
        }
        DbCommand::Setup { db_id } => ("setup", db_id, None),
    };

    let (store, engine) = global.engine()?;
    let db: ManagedDatabase = store.load(&db_id)?;
    let host = if db.address.as_deref().is_some_and(|a| !a.trim().is_empty()) {
        None
    } else {
        owning_host(&store, &db)?
    };

    let script = match sql {
        Some(sql) => sql,
        None => db
            .setup_script
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| datacenter::Error::config_missing_key("setupScript", Some(db.id.clone())))?,
    };

    let endpoint = db.endpoint(host.as_ref(), &engine.settings().database)?;
    datacenter::log_status!("db", "{} on {}:{}/{}", name, endpoint.address, endpoint.port, endpoint.dbname);
    let report = database::run_batch(&engine, &endpoint, &script)?;

    let exit_code = if report.is_success() { 0 } else { 30 };
    Ok((
        DbOutput::Run(DbRunOutput {
            command: format!("db.{}", name),
            db_id,
            statements: report.executed,
            failed: report.errors.len(),
            result: report.message(),
        }),
        exit_code,
    ))
}
