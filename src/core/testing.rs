//! Scripted stand-ins for the transport and database adapters.

use crate::database::{DbEndpoint, StatementConnector, StatementResult, StatementSession};
use crate::defaults::Defaults;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::application::ManagedApplication;
use crate::host::Host;
use crate::ssh::{CommandOutput, Connector, Session, SshTarget};
use crate::store::{MemoryStore, RecordStore};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubCall {
    pub host_id: String,
    pub command: String,
    pub input: Option<String>,
}

#[derive(Default)]
struct StubState {
    replies: VecDeque<Result<CommandOutput>>,
    calls: Vec<StubCall>,
    connect_error: Option<Error>,
    connects: usize,
    hold: Option<(Sender<()>, Receiver<()>)>,
}

/// Records every exec. Replies are consumed in order; an empty queue answers
/// with a successful empty output.
#[derive(Clone, Default)]
pub struct StubConnector {
    state: Arc<Mutex<StubState>>,
}

impl StubConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, output: CommandOutput) {
        self.state.lock().unwrap().replies.push_back(Ok(output));
    }

    pub fn reply_err(&self, err: Error) {
        self.state.lock().unwrap().replies.push_back(Err(err));
    }

    pub fn fail_connect(&self, err: Error) {
        self.state.lock().unwrap().connect_error = Some(err);
    }

    pub fn calls(&self) -> Vec<StubCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.command).collect()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    /// Park the next exec until released. The first receiver fires once the
    /// exec has started; sending on the returned sender lets it finish.
    pub fn hold_next_exec(&self) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        self.state.lock().unwrap().hold = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }
}

impl Connector for StubConnector {
    fn connect(&self, target: &SshTarget) -> Result<Box<dyn Session>> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if let Some(err) = &state.connect_error {
            return Err(err.clone());
        }
        Ok(Box::new(StubSession {
            host_id: target.host_id.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct StubSession {
    host_id: String,
    state: Arc<Mutex<StubState>>,
}

impl StubSession {
    fn record(&mut self, command: &str, input: Option<&[u8]>) -> Result<CommandOutput> {
        let (reply, hold) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(StubCall {
                host_id: self.host_id.clone(),
                command: command.to_string(),
                input: input.map(|bytes| String::from_utf8_lossy(bytes).to_string()),
            });
            let reply = state
                .replies
                .pop_front()
                .unwrap_or_else(|| Ok(CommandOutput::ok("")));
            (reply, state.hold.take())
        };
        if let Some((entered, release)) = hold {
            entered.send(()).unwrap();
            release.recv().unwrap();
        }
        reply
    }
}

impl Session for StubSession {
    fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        self.record(command, None)
    }

    fn exec_with_input(&mut self, command: &str, input: &[u8]) -> Result<CommandOutput> {
        self.record(command, Some(input))
    }
}

#[derive(Default)]
struct StatementState {
    failures: Vec<(String, String)>,
    executed: Vec<String>,
    connect_error: Option<Error>,
    connects: usize,
    closed: usize,
}

/// Each statement echoes itself back as a one-row result unless it matches a
/// registered failure pattern.
#[derive(Clone, Default)]
pub struct StubStatements {
    state: Arc<Mutex<StatementState>>,
}

impl StubStatements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, pattern: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((pattern.to_string(), message.to_string()));
    }

    pub fn fail_connect(&self, err: Error) {
        self.state.lock().unwrap().connect_error = Some(err);
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }
}

impl StatementConnector for StubStatements {
    fn connect(&self, _endpoint: &DbEndpoint) -> Result<Box<dyn StatementSession>> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if let Some(err) = &state.connect_error {
            return Err(err.clone());
        }
        Ok(Box::new(StubStatementSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct StubStatementSession {
    state: Arc<Mutex<StatementState>>,
}

impl StatementSession for StubStatementSession {
    fn execute(&mut self, statement: &str) -> std::result::Result<StatementResult, String> {
        let mut state = self.state.lock().unwrap();
        state.executed.push(statement.to_string());
        if let Some((_, message)) = state
            .failures
            .iter()
            .find(|(pattern, _)| statement.contains(pattern.as_str()))
        {
            return Err(message.clone());
        }
        Ok(StatementResult {
            columns: vec!["result".to_string()],
            rows: vec![vec![Some(statement.to_string())]],
        })
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closed += 1;
    }
}

/// Every save fails as if the disk were full.
pub struct FailingStore;

impl RecordStore for FailingStore {
    fn save_host(&self, _host: &Host) -> Result<()> {
        Err(Error::internal_io("disk full", None))
    }

    fn save_application(&self, _application: &ManagedApplication) -> Result<()> {
        Err(Error::internal_io("disk full", None))
    }
}

pub fn engine_with(connector: &StubConnector, store: &Arc<MemoryStore>) -> Engine {
    Engine::new(Defaults::default())
        .with_connector(connector.clone())
        .with_statement_connector(StubStatements::new())
        .with_store(Arc::clone(store))
}

pub fn engine_with_statements(statements: &StubStatements) -> Engine {
    Engine::new(Defaults::default())
        .with_connector(StubConnector::new())
        .with_statement_connector(statements.clone())
        .with_store(Arc::new(MemoryStore::new()))
}
