//! The collaborators every execution path needs, bundled once per invocation.

use crate::database::{PostgresConnector, StatementConnector};
use crate::defaults::{self, Defaults};
use crate::error::Result;
use crate::sigil::Interpolator;
use crate::ssh::{Connector, SystemConnector};
use crate::store::{JsonStore, NullStore, RecordStore};
use std::path::Path;

pub struct Engine {
    connector: Box<dyn Connector>,
    statements: Box<dyn StatementConnector>,
    store: Box<dyn RecordStore>,
    settings: Defaults,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Defaults::default())
    }
}

impl Engine {
    /// System ssh, PostgreSQL and no persistence.
    pub fn new(settings: Defaults) -> Self {
        Self {
            connector: Box::new(SystemConnector::new()),
            statements: Box::new(PostgresConnector::new()),
            store: Box::new(NullStore),
            settings,
        }
    }

    /// Engine that persists into the JSON store rooted at `root`, with its settings.
    pub fn from_config_root(root: &Path) -> Result<Self> {
        let config = defaults::load_config(root)?;
        Ok(Self::new(config.defaults).with_store(JsonStore::new(root)))
    }

    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Box::new(connector);
        self
    }

    pub fn with_statement_connector(
        mut self,
        statements: impl StatementConnector + 'static,
    ) -> Self {
        self.statements = Box::new(statements);
        self
    }

    pub fn with_store(mut self, store: impl RecordStore + 'static) -> Self {
        self.store = Box::new(store);
        self
    }

    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    pub fn statements(&self) -> &dyn StatementConnector {
        self.statements.as_ref()
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub fn settings(&self) -> &Defaults {
        &self.settings
    }

    pub fn interpolator(&self) -> Interpolator {
        Interpolator::new(self.settings.interpolation.max_depth)
    }
}
