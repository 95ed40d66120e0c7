//! Application lifecycle on top of host execution.
//!
//! Every action is a template resolved against the application record (and its
//! host under `server`) right before dispatch. Provisioning actions stage a
//! script under the application base path, mark it executable and run it.

use crate::config::ConfigEntity;
use crate::defaults::ApplicationDefaults;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::host::{self, ExecOutcome, Host, HostState, BUSY_MESSAGE};
use crate::sigil::Context;
use crate::utils::shell;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Running,
    #[default]
    Stopped,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Running => "running",
            AppStatus::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommandTemplates {
    #[serde(default = "default_start")]
    pub start: String,
    #[serde(default = "default_stop")]
    pub stop: String,
    #[serde(default = "default_restart")]
    pub restart: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default = "default_journal")]
    pub journal: String,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            start: default_start(),
            stop: default_stop(),
            restart: default_restart(),
            status: default_status(),
            journal: default_journal(),
        }
    }
}

fn default_start() -> String {
    "sudo systemctl start %[service_name]".to_string()
}

fn default_stop() -> String {
    "sudo systemctl stop %[service_name]".to_string()
}

fn default_restart() -> String {
    "sudo systemctl restart %[service_name]".to_string()
}

fn default_status() -> String {
    "systemctl status %[service_name] --no-pager".to_string()
}

fn default_journal() -> String {
    "journalctl -u %[service_name] -n 200 --no-pager".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleScripts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uninstall: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Install,
    Update,
    Uninstall,
}

impl LifecycleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleAction::Install => "install",
            LifecycleAction::Update => "update",
            LifecycleAction::Uninstall => "uninstall",
        }
    }

    /// Fixed name the script is staged under, inside the application base path.
    pub fn script_name(&self) -> &'static str {
        match self {
            LifecycleAction::Install => "install.sh",
            LifecycleAction::Update => "update.sh",
            LifecycleAction::Uninstall => "uninstall.sh",
        }
    }

    fn script<'a>(&self, scripts: &'a LifecycleScripts) -> Option<&'a str> {
        let script = match self {
            LifecycleAction::Install => &scripts.install,
            LifecycleAction::Update => &scripts.update,
            LifecycleAction::Uninstall => &scripts.uninstall,
        };
        script.as_deref().filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedApplication {
    #[serde(skip_deserializing, default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// The host this application runs on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default = "default_app_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    /// Comma separated list of requirements, for install scripts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,

    #[serde(default)]
    pub commands: CommandTemplates,
    #[serde(default)]
    pub scripts: LifecycleScripts,
    /// Substring of status output that means the service is up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_pattern: Option<String>,

    #[serde(default)]
    pub expected_status: AppStatus,
    #[serde(default)]
    pub last_message: String,
}

fn default_app_port() -> u16 {
    80
}

impl ManagedApplication {
    pub fn new(id: impl Into<String>, host_id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            host_id: Some(host_id.into()),
            service_name: None,
            port: default_app_port(),
            base_path: None,
            git_url: None,
            git_branch: None,
            requirements: None,
            commands: CommandTemplates::default(),
            scripts: LifecycleScripts::default(),
            status_pattern: None,
            expected_status: AppStatus::Stopped,
            last_message: String::new(),
        }
    }

    pub fn service_name(&self) -> &str {
        match self.service_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ if !self.name.is_empty() => &self.name,
            _ => &self.id,
        }
    }

    /// Configured install directory, else `<parent>/<service name>` where the
    /// parent is the configured `baseDir` or the host base path.
    pub fn base_path(&self, host: &Host, defaults: &ApplicationDefaults) -> String {
        if let Some(path) = self.base_path.as_deref().filter(|p| !p.trim().is_empty()) {
            return path.trim().to_string();
        }
        let parent = defaults
            .base_dir
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| host.base_path());
        shell::join_remote(&parent, self.service_name())
    }

    pub fn status_pattern<'a>(&'a self, defaults: &'a ApplicationDefaults) -> &'a str {
        self.status_pattern
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(&defaults.status_pattern)
    }

    /// The owning host id; a missing reference is a configuration error.
    pub fn host_id(&self) -> Result<&str> {
        self.host_id
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| Error::config_missing_key("hostId", Some(self.id.clone())))
    }

    pub fn template_value(&self, host: &Host, defaults: &ApplicationDefaults) -> Value {
        let name = if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        };
        json!({
            "id": self.id,
            "name": name,
            "service_name": self.service_name(),
            "port": self.port,
            "base_path": self.base_path(host, defaults),
            "git_url": self.git_url,
            "git_branch": self.git_branch,
            "requirements": self.requirements,
            "status_pattern": self.status_pattern(defaults),
            "expected_status": self.expected_status.as_str(),
            "commands": {
                "start": self.commands.start,
                "stop": self.commands.stop,
                "restart": self.commands.restart,
                "status": self.commands.status,
                "journal": self.commands.journal,
            },
            "server": host.template_value(),
        })
    }
}

impl ConfigEntity for ManagedApplication {
    fn id(&self) -> &str {
        &self.id
    }
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
    fn dir_name() -> &'static str {
        "applications"
    }
    fn entity_type() -> &'static str {
        "application"
    }
    fn not_found_error(id: String, suggestions: Vec<String>) -> Error {
        Error::application_not_found(id, suggestions)
    }
}

// ============================================================================
// Actions
// ============================================================================

pub(crate) fn ensure_host(app: &ManagedApplication, host: &Host) -> Result<()> {
    let host_id = app.host_id()?;
    if host_id != host.id {
        return Err(Error::config_invalid_value(
            "hostId",
            Some(host.id.clone()),
            format!(
                "Application '{}' belongs to host '{}', not '{}'",
                app.id, host_id, host.id
            ),
        ));
    }
    Ok(())
}

fn resolve_for(engine: &Engine, app: &ManagedApplication, host: &Host, template: &str) -> String {
    let context = Context::from_owned(app.template_value(host, &engine.settings().application));
    engine.interpolator().resolve(template, &context)
}

fn run_in_app_dir(
    engine: &Engine,
    app: &ManagedApplication,
    host: &mut Host,
    template: &str,
) -> Result<ExecOutcome> {
    let command = resolve_for(engine, app, host, template);
    let base = app.base_path(host, &engine.settings().application);
    host::execute(engine, host, Some(&command), Some(&base), false)
}

fn record(engine: &Engine, app: &mut ManagedApplication, message: &str) -> String {
    app.last_message = message.to_string();
    if let Err(err) = engine.store().save_application(app) {
        log::warn!("Failed to persist application '{}': {}", app.id, err);
    }
    app.last_message.clone()
}

fn transition(
    engine: &Engine,
    app: &mut ManagedApplication,
    host: &mut Host,
    expected: AppStatus,
    template: String,
    action: &str,
) -> Result<String> {
    ensure_host(app, host)?;
    if host.is_busy() {
        return Ok(record(engine, app, BUSY_MESSAGE));
    }

    log::info!("{} '{}' on '{}'", action, app.id, host.id);
    app.expected_status = expected;
    engine.store().save_application(app)?;

    let outcome = run_in_app_dir(engine, app, host, &template)?;
    Ok(record(engine, app, outcome.message()))
}

pub fn start(engine: &Engine, app: &mut ManagedApplication, host: &mut Host) -> Result<String> {
    let template = app.commands.start.clone();
    transition(engine, app, host, AppStatus::Running, template, "Starting")
}

pub fn stop(engine: &Engine, app: &mut ManagedApplication, host: &mut Host) -> Result<String> {
    let template = app.commands.stop.clone();
    transition(engine, app, host, AppStatus::Stopped, template, "Stopping")
}

pub fn restart(engine: &Engine, app: &mut ManagedApplication, host: &mut Host) -> Result<String> {
    let template = app.commands.restart.clone();
    transition(engine, app, host, AppStatus::Running, template, "Restarting")
}

/// Observe the service and reconcile `expected_status` with what was seen.
pub fn status(engine: &Engine, app: &mut ManagedApplication, host: &mut Host) -> Result<AppStatus> {
    ensure_host(app, host)?;
    let template = app.commands.status.clone();
    let outcome = run_in_app_dir(engine, app, host, &template)?;
    if outcome.is_busy() {
        return Err(Error::host_busy(host.id.clone()));
    }

    let pattern = app.status_pattern(&engine.settings().application).to_string();
    let observed = if outcome.output().contains(&pattern) {
        AppStatus::Running
    } else {
        AppStatus::Stopped
    };
    log::debug!("Application '{}' observed {}", app.id, observed.as_str());

    app.expected_status = observed;
    record(engine, app, outcome.message());
    Ok(observed)
}

pub fn journal(engine: &Engine, app: &mut ManagedApplication, host: &mut Host) -> Result<String> {
    ensure_host(app, host)?;
    let template = app.commands.journal.clone();
    let outcome = run_in_app_dir(engine, app, host, &template)?;
    Ok(record(engine, app, outcome.message()))
}

pub fn install(engine: &Engine, app: &mut ManagedApplication, host: &mut Host) -> Result<String> {
    provision(engine, app, host, LifecycleAction::Install)
}

pub fn update(engine: &Engine, app: &mut ManagedApplication, host: &mut Host) -> Result<String> {
    provision(engine, app, host, LifecycleAction::Update)
}

/// Refuses to touch a running service, or one whose status could not be
/// read at all. Status is checked before anything is staged.
pub fn uninstall(engine: &Engine, app: &mut ManagedApplication, host: &mut Host) -> Result<String> {
    provision(engine, app, host, LifecycleAction::Uninstall)
}

fn provision(
    engine: &Engine,
    app: &mut ManagedApplication,
    host: &mut Host,
    action: LifecycleAction,
) -> Result<String> {
    ensure_host(app, host)?;
    let script = action.script(&app.scripts).map(str::to_string).ok_or_else(|| {
        Error::config_missing_key(format!("scripts.{}", action.as_str()), Some(app.id.clone()))
    })?;

    if host.is_busy() {
        return Ok(record(engine, app, BUSY_MESSAGE));
    }

    if action == LifecycleAction::Uninstall {
        if status(engine, app, host)? == AppStatus::Running {
            return Err(Error::application_running(app.id.clone()));
        }
        if host.state == HostState::Failure && host.last_stdout.trim().is_empty() {
            return Err(Error::remote_command_failed(
                host.id.clone(),
                host.last_command.clone().unwrap_or_default(),
                host.last_stderr.clone(),
            )
            .with_hint("The service state could not be observed; uninstall was not attempted"));
        }
    }

    let base = app.base_path(host, &engine.settings().application);
    log::info!("Running {} for '{}' in {}", action.as_str(), app.id, base);

    if action == LifecycleAction::Install {
        let mkdir = format!("mkdir -p {}", shell::quote_path(&base));
        let outcome = host::execute(engine, host, Some(&mkdir), None, false)?;
        if !outcome.is_success() {
            return Ok(record(engine, app, outcome.message()));
        }
    }

    let content = resolve_for(engine, app, host, &script);
    let script_path = shell::join_remote(&base, action.script_name());
    host::upload(engine, host, &script_path, content.as_bytes(), true)?;

    let outcome = host::execute(
        engine,
        host,
        Some(&shell::quote_path(&script_path)),
        Some(&base),
        false,
    )?;
    Ok(record(engine, app, outcome.message()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::CommandOutput;
    use crate::store::MemoryStore;
    use crate::core::testing::{engine_with, StubConnector};
    use std::sync::Arc;

    fn fixtures() -> (ManagedApplication, Host) {
        let mut host = Host::new("web-1", "10.0.0.5", "odoo");
        host.password = Some("pw".to_string());
        let mut app = ManagedApplication::new("erp", "web-1");
        app.service_name = Some("odoo".to_string());
        (app, host)
    }

    #[test]
    fn base_path_derives_from_service_name() {
        let (mut app, host) = fixtures();
        let defaults = ApplicationDefaults::default();
        assert_eq!(app.base_path(&host, &defaults), "/home/odoo/odoo");

        app.base_path = Some("/opt/erp".to_string());
        assert_eq!(app.base_path(&host, &defaults), "/opt/erp");
    }

    #[test]
    fn start_sets_intent_before_running() {
        let stub = StubConnector::new();
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(&stub, &store);
        let (mut app, mut host) = fixtures();

        start(&engine, &mut app, &mut host).unwrap();

        let saved = store.application_snapshots();
        assert_eq!(saved[0].expected_status, AppStatus::Running);
        assert_eq!(
            stub.commands(),
            vec!["cd /home/odoo/odoo && sudo systemctl start odoo"]
        );
    }

    #[test]
    fn templates_can_reference_other_templates() {
        let stub = StubConnector::new();
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(&stub, &store);
        let (mut app, mut host) = fixtures();
        app.commands.restart = "%[commands.stop] && %[commands.start]".to_string();

        restart(&engine, &mut app, &mut host).unwrap();

        assert_eq!(
            stub.commands(),
            vec!["cd /home/odoo/odoo && sudo systemctl stop odoo && sudo systemctl start odoo"]
        );
    }

    #[test]
    fn status_matches_pattern() {
        let stub = StubConnector::new();
        stub.reply(CommandOutput::ok("Active: active (running) since Mon"));
        stub.reply(CommandOutput {
            stdout: "Active: inactive (dead)".to_string(),
            stderr: String::new(),
            success: false,
            exit_code: 3,
        });
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(&stub, &store);
        let (mut app, mut host) = fixtures();

        assert_eq!(status(&engine, &mut app, &mut host).unwrap(), AppStatus::Running);
        assert_eq!(app.expected_status, AppStatus::Running);

        assert_eq!(status(&engine, &mut app, &mut host).unwrap(), AppStatus::Stopped);
        assert_eq!(app.expected_status, AppStatus::Stopped);
    }

    #[test]
    fn custom_status_pattern_is_used() {
        let stub = StubConnector::new();
        stub.reply(CommandOutput::ok("pong"));
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(&stub, &store);
        let (mut app, mut host) = fixtures();
        app.status_pattern = Some("pong".to_string());

        assert_eq!(status(&engine, &mut app, &mut host).unwrap(), AppStatus::Running);
    }

    #[test]
    fn uninstall_refuses_running_service_before_staging() {
        let stub = StubConnector::new();
        stub.reply(CommandOutput::ok("active (running)"));
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(&stub, &store);
        let (mut app, mut host) = fixtures();
        app.scripts.uninstall = Some("rm -rf %[base_path]".to_string());

        let err = uninstall(&engine, &mut app, &mut host).unwrap_err();

        assert_eq!(err.code.as_str(), "application.running");
        let commands = stub.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains("systemctl status odoo"));
    }

    #[test]
    fn uninstall_stopped_service_runs_script() {
        let stub = StubConnector::new();
        stub.reply(CommandOutput {
            stdout: "Active: inactive (dead)\n".to_string(),
            stderr: String::new(),
            success: false,
            exit_code: 3,
        });
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(&stub, &store);
        let (mut app, mut host) = fixtures();
        app.scripts.uninstall = Some("rm -rf %[base_path]".to_string());

        uninstall(&engine, &mut app, &mut host).unwrap();

        let calls = stub.calls();
        assert_eq!(calls[1].command, "cat > '/home/odoo/odoo/uninstall.sh'");
        assert_eq!(calls[1].input.as_deref(), Some("rm -rf /home/odoo/odoo"));
    }

    #[test]
    fn uninstall_refuses_when_status_cannot_be_read() {
        let stub = StubConnector::new();
        stub.reply_err(Error::remote_command_timeout("web-1", 300));
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(&stub, &store);
        let (mut app, mut host) = fixtures();
        app.scripts.uninstall = Some("rm -rf %[base_path]".to_string());

        let err = uninstall(&engine, &mut app, &mut host).unwrap_err();

        assert_eq!(err.code.as_str(), "remote.command_failed");
        assert!(err.message.contains("did not finish"));
        assert_eq!(stub.commands().len(), 1);
    }

    #[test]
    fn provisioning_on_a_busy_host_touches_nothing() {
        let stub = StubConnector::new();
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(&stub, &store);
        let (mut app, mut host) = fixtures();
        host.state = HostState::Pending;
        app.scripts.update = Some("git pull".to_string());
        app.scripts.install = Some("pip install -r requirements.txt".to_string());

        assert_eq!(update(&engine, &mut app, &mut host).unwrap(), BUSY_MESSAGE);
        assert_eq!(install(&engine, &mut app, &mut host).unwrap(), BUSY_MESSAGE);

        assert!(stub.calls().is_empty());
        assert_eq!(stub.connects(), 0);
        assert_eq!(host.state, HostState::Pending);
        assert_eq!(app.last_message, BUSY_MESSAGE);
    }

    #[test]
    fn install_creates_directory_then_stages_and_runs() {
        let stub = StubConnector::new();
        stub.reply(CommandOutput::ok(""));
        stub.reply(CommandOutput::ok(""));
        stub.reply(CommandOutput::ok(""));
        stub.reply(CommandOutput::ok("installed\n"));
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(&stub, &store);
        let (mut app, mut host) = fixtures();
        app.git_url = Some("https://example.com/erp.git".to_string());
        app.scripts.install = Some("git clone %[git_url] src".to_string());

        let message = install(&engine, &mut app, &mut host).unwrap();

        assert_eq!(message, "installed\n");
        assert_eq!(app.last_message, "installed\n");
        let calls = stub.calls();
        assert_eq!(calls[0].command, "cd /home/odoo && mkdir -p '/home/odoo/odoo'");
        assert_eq!(calls[1].command, "cat > '/home/odoo/odoo/install.sh'");
        assert_eq!(
            calls[1].input.as_deref(),
            Some("git clone https://example.com/erp.git src")
        );
        assert_eq!(calls[2].command, "chmod +x '/home/odoo/odoo/install.sh'");
        assert_eq!(
            calls[3].command,
            "cd /home/odoo/odoo && '/home/odoo/odoo/install.sh'"
        );
    }

    #[test]
    fn missing_script_is_a_config_error() {
        let stub = StubConnector::new();
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(&stub, &store);
        let (mut app, mut host) = fixtures();

        let err = update(&engine, &mut app, &mut host).unwrap_err();
        assert_eq!(err.code.as_str(), "config.missing_key");
        assert_eq!(stub.connects(), 0);
    }

    #[test]
    fn wrong_or_missing_host_is_rejected() {
        let stub = StubConnector::new();
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(&stub, &store);
        let (mut app, mut host) = fixtures();

        app.host_id = Some("db-1".to_string());
        assert!(start(&engine, &mut app, &mut host).is_err());
        app.host_id = None;
        assert_eq!(
            start(&engine, &mut app, &mut host).unwrap_err().code.as_str(),
            "config.missing_key"
        );
        assert_eq!(stub.connects(), 0);
    }

    #[test]
    fn busy_host_records_message_without_changing_intent() {
        let stub = StubConnector::new();
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(&stub, &store);
        let (mut app, mut host) = fixtures();
        host.state = HostState::Pending;

        let message = stop(&engine, &mut app, &mut host).unwrap();
        assert_eq!(message, BUSY_MESSAGE);
        assert_eq!(app.expected_status, AppStatus::Stopped);
        app.expected_status = AppStatus::Running;
        assert_eq!(stop(&engine, &mut app, &mut host).unwrap(), BUSY_MESSAGE);
        assert_eq!(app.expected_status, AppStatus::Running);

        assert!(status(&engine, &mut app, &mut host).is_err());
    }
}
