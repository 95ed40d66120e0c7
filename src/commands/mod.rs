use clap::Subcommand;
use serde::Serialize;

use datacenter::config::ConfigEntity;
use datacenter::engine::Engine;
use datacenter::store::JsonStore;

pub type CmdResult<T> = datacenter::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    pub config_dir: Option<String>,
}

impl GlobalArgs {
    pub fn store(&self) -> datacenter::Result<JsonStore> {
        match self.config_dir.as_deref().filter(|d| !d.trim().is_empty()) {
            Some(dir) => Ok(JsonStore::new(shellexpand::tilde(dir).to_string())),
            None => JsonStore::open_default(),
        }
    }

    /// The record store plus an engine persisting into it.
    pub fn engine(&self) -> datacenter::Result<(JsonStore, Engine)> {
        let store = self.store()?;
        let engine = Engine::from_config_root(store.root())?;
        Ok((store, engine))
    }
}

/// CRUD subcommands shared by every record kind.
#[derive(Subcommand)]
pub enum RecordCommand {
    /// List all records
    List,
    /// Display one record
    Show {
        /// Record ID
        id: String,
    },
    /// Create a record from a JSON spec carrying its `id` (supports @file and - for stdin)
    Create {
        /// JSON spec
        spec: String,
    },
    /// Merge a JSON patch into a record (null removes a field)
    #[command(visible_aliases = ["edit", "merge"])]
    Set {
        /// Record ID
        id: String,
        /// JSON merge patch (supports @file and - for stdin)
        spec: String,
    },
    /// Remove a record
    Delete {
        /// Record ID
        id: String,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOutput<T: Serialize> {
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    records: Option<Vec<T>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted: Option<Vec<String>>,
}

impl<T: Serialize> RecordOutput<T> {
    fn new(command: String) -> Self {
        Self {
            command,
            id: None,
            record: None,
            records: None,
            updated: None,
            deleted: None,
        }
    }
}

/// Run a CRUD subcommand. `present` shapes records for output (e.g. redaction).
pub(crate) fn run_record<T: ConfigEntity>(
    store: &JsonStore,
    command: RecordCommand,
    present: fn(T) -> T,
) -> CmdResult<RecordOutput<T>> {
    let kind = T::entity_type();
    match command {
        RecordCommand::List => {
            let records = store.list::<T>()?.into_iter().map(present).collect();
            let mut out = RecordOutput::new(format!("{}.list", kind));
            out.records = Some(records);
            Ok((out, 0))
        }
        RecordCommand::Show { id } => {
            let record = store.load::<T>(&id)?;
            let mut out = RecordOutput::new(format!("{}.show", kind));
            out.id = Some(id);
            out.record = Some(present(record));
            Ok((out, 0))
        }
        RecordCommand::Create { spec } => {
            let record = store.create::<T>(&spec)?;
            log::info!("Created {} '{}'", kind, record.id());
            let mut out = RecordOutput::new(format!("{}.create", kind));
            out.id = Some(record.id().to_string());
            out.record = Some(present(record));
            out.updated = Some(vec!["created".to_string()]);
            Ok((out, 0))
        }
        RecordCommand::Set { id, spec } => {
            let result = store.merge::<T>(&id, &spec)?;
            let record = store.load::<T>(&id)?;
            let mut out = RecordOutput::new(format!("{}.set", kind));
            out.id = Some(result.id);
            out.record = Some(present(record));
            out.updated = Some(result.updated_fields);
            Ok((out, 0))
        }
        RecordCommand::Delete { id } => {
            store.delete::<T>(&id)?;
            let mut out = RecordOutput::new(format!("{}.delete", kind));
            out.deleted = Some(vec![id.clone()]);
            out.id = Some(id);
            Ok((out, 0))
        }
    }
}

fn keep<T>(record: T) -> T {
    record
}

pub mod app;
pub mod command;
pub mod db;
pub mod host;
pub mod sigil;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (datacenter::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Host(args) => dispatch!(args, global, host),
        crate::Commands::App(args) => dispatch!(args, global, app),
        crate::Commands::Db(args) => dispatch!(args, global, db),
        crate::Commands::Command(args) => dispatch!(args, global, command),
        crate::Commands::Sigil(args) => dispatch!(args, global, sigil),
    }
}
