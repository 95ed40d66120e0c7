use super::{DbEndpoint, StatementConnector, StatementResult, StatementSession};
use crate::error::{Error, Result};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Column, Connection, Row, ValueRef};
use tokio::runtime::Runtime;

/// Direct PostgreSQL connections over sqlx, driven from synchronous code.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresConnector;

impl PostgresConnector {
    pub fn new() -> Self {
        Self
    }
}

impl StatementConnector for PostgresConnector {
    fn connect(&self, endpoint: &DbEndpoint) -> Result<Box<dyn StatementSession>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::internal_io(e.to_string(), Some("start runtime".to_string())))?;

        let options = PgConnectOptions::new()
            .host(&endpoint.address)
            .port(endpoint.port)
            .username(&endpoint.user)
            .database(&endpoint.dbname);

        let conn = runtime
            .block_on(async {
                tokio::time::timeout(endpoint.connect_timeout, PgConnection::connect_with(&options))
                    .await
            })
            .map_err(|_| {
                Error::database_connect_failed(
                    endpoint.database_id.clone(),
                    format!("timed out after {}s", endpoint.connect_timeout.as_secs()),
                )
            })?
            .map_err(|e| Error::database_connect_failed(endpoint.database_id.clone(), e.to_string()))?;

        log::debug!(
            "Connected to {}@{}:{}/{}",
            endpoint.user,
            endpoint.address,
            endpoint.port,
            endpoint.dbname
        );

        Ok(Box::new(PgSession {
            runtime,
            conn: Some(conn),
        }))
    }
}

struct PgSession {
    runtime: Runtime,
    conn: Option<PgConnection>,
}

impl StatementSession for PgSession {
    fn execute(&mut self, statement: &str) -> std::result::Result<StatementResult, String> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| "connection already closed".to_string())?;

        // Simple-query protocol: no implicit transaction, every value arrives as text.
        let rows: Vec<PgRow> = self
            .runtime
            .block_on(sqlx::raw_sql(statement).fetch_all(&mut *conn))
            .map_err(|e| e.to_string())?;

        Ok(rows_to_result(&rows))
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = self.runtime.block_on(conn.close()) {
                log::debug!("Error while closing database connection: {}", e);
            }
        }
    }
}

fn rows_to_result(rows: &[PgRow]) -> StatementResult {
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let rows = rows
        .iter()
        .map(|row| {
            (0..row.len())
                .map(|i| {
                    let value = row.try_get_raw(i).ok()?;
                    if value.is_null() {
                        return None;
                    }
                    value.as_str().ok().map(str::to_string)
                })
                .collect()
        })
        .collect();

    StatementResult { columns, rows }
}
