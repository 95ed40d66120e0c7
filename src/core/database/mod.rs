//! Managed databases and the semicolon-delimited statement runner.
//!
//! Statements run one by one on a direct connection in auto-commit mode. A
//! failing statement is recorded and the batch moves on; the connection is
//! closed on every exit path.

mod postgres;

pub use postgres::PostgresConnector;

use crate::config::ConfigEntity;
use crate::defaults::DatabaseDefaults;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::host::Host;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedDatabase {
    #[serde(skip_deserializing, default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    /// Falls back to the address of the owning host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Database name on the server. Defaults to `name`, then the id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_script: Option<String>,
}

/// Where and as whom to connect. Authentication is trust-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbEndpoint {
    pub database_id: String,
    pub address: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub connect_timeout: Duration,
}

impl ManagedDatabase {
    pub fn new(id: impl Into<String>, address: impl Into<String>, user: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            application_id: None,
            host_id: None,
            address: Some(address.into()),
            port: None,
            database: None,
            user: user.into(),
            setup_script: None,
        }
    }

    pub fn endpoint(&self, host: Option<&Host>, defaults: &DatabaseDefaults) -> Result<DbEndpoint> {
        let address = self
            .address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .or_else(|| host.map(|h| h.address.trim().to_string()))
            .filter(|a| !a.is_empty())
            .ok_or_else(|| Error::config_missing_key("address", Some(self.id.clone())))?;

        let dbname = self
            .database
            .clone()
            .filter(|d| !d.trim().is_empty())
            .or_else(|| Some(self.name.clone()).filter(|n| !n.trim().is_empty()))
            .unwrap_or_else(|| self.id.clone());

        Ok(DbEndpoint {
            database_id: self.id.clone(),
            address,
            port: self.port.unwrap_or(defaults.port),
            dbname,
            user: self.user.clone(),
            connect_timeout: defaults.connect_timeout(),
        })
    }

    pub fn template_value(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "application_id": self.application_id,
            "host_id": self.host_id,
            "address": self.address,
            "port": self.port,
            "database": self.database,
            "user": self.user,
        })
    }
}

impl ConfigEntity for ManagedDatabase {
    fn id(&self) -> &str {
        &self.id
    }
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
    fn dir_name() -> &'static str {
        "databases"
    }
    fn entity_type() -> &'static str {
        "database"
    }
    fn not_found_error(id: String, suggestions: Vec<String>) -> Error {
        Error::database_not_found(id, suggestions)
    }
    fn validate(&self) -> Result<()> {
        if self.user.trim().is_empty() {
            return Err(Error::config_missing_key("user", Some(self.id.clone())));
        }
        let has_address = self.address.as_deref().is_some_and(|a| !a.trim().is_empty());
        if !has_address && self.host_id.is_none() {
            return Err(Error::config_missing_key("address", Some(self.id.clone())));
        }
        Ok(())
    }
}

// ============================================================================
// Statement execution
// ============================================================================

/// Rows of one statement, every value in its text form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl StatementResult {
    /// Tab-separated header and rows; NULL for missing values.
    pub fn render(&self) -> String {
        if self.columns.is_empty() && self.rows.is_empty() {
            return "OK".to_string();
        }

        let mut lines = Vec::with_capacity(self.rows.len() + 1);
        if !self.columns.is_empty() {
            lines.push(self.columns.join("\t"));
        }
        for row in &self.rows {
            let cells: Vec<&str> = row
                .iter()
                .map(|cell| cell.as_deref().unwrap_or("NULL"))
                .collect();
            lines.push(cells.join("\t"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementError {
    /// 1-based position in the batch.
    pub index: usize,
    pub statement: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub executed: usize,
    pub last_result: Option<StatementResult>,
    pub errors: Vec<StatementError>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// The combined error text, or the final statement's rendered result.
    pub fn message(&self) -> String {
        if !self.errors.is_empty() {
            return self
                .errors
                .iter()
                .map(|e| format!("Statement {} ({}): {}", e.index, e.statement, e.message.trim()))
                .collect::<Vec<_>>()
                .join("\n");
        }
        self.last_result
            .as_ref()
            .map(StatementResult::render)
            .unwrap_or_default()
    }
}

pub trait StatementSession {
    /// Run one statement. `Err` carries the server's error text.
    fn execute(&mut self, statement: &str) -> std::result::Result<StatementResult, String>;
    fn close(&mut self);
}

pub trait StatementConnector: Send + Sync {
    fn connect(&self, endpoint: &DbEndpoint) -> Result<Box<dyn StatementSession>>;
}

/// Closes the wrapped session when dropped.
struct Closing(Box<dyn StatementSession>);

impl Drop for Closing {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Split on `;` and drop blank fragments. Semicolons inside literals are not special.
pub fn split_statements(script: &str) -> Vec<&str> {
    script
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn run_batch(engine: &Engine, endpoint: &DbEndpoint, script: &str) -> Result<BatchReport> {
    let statements = split_statements(script);
    if statements.is_empty() {
        return Ok(BatchReport::default());
    }

    let mut session = Closing(engine.statements().connect(endpoint)?);
    let mut report = BatchReport::default();

    for (i, statement) in statements.iter().enumerate() {
        log::debug!("[{}] statement {}: {}", endpoint.database_id, i + 1, statement);
        report.executed += 1;
        match session.0.execute(statement) {
            Ok(result) => report.last_result = Some(result),
            Err(message) => {
                log::debug!("[{}] statement {} failed: {}", endpoint.database_id, i + 1, message);
                report.errors.push(StatementError {
                    index: i + 1,
                    statement: statement.to_string(),
                    message,
                });
            }
        }
    }

    Ok(report)
}

/// Run `script` against `database` and return the result or combined error text.
pub fn run_statements(
    engine: &Engine,
    database: &ManagedDatabase,
    host: Option<&Host>,
    script: &str,
) -> Result<String> {
    let endpoint = database.endpoint(host, &engine.settings().database)?;
    Ok(run_batch(engine, &endpoint, script)?.message())
}

/// Run the database's configured setup script.
pub fn setup(engine: &Engine, database: &ManagedDatabase, host: Option<&Host>) -> Result<String> {
    let script = database
        .setup_script
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::config_missing_key("setupScript", Some(database.id.clone())))?;

    log::info!("Running setup script for database '{}'", database.id);
    run_statements(engine, database, host, script)
}
