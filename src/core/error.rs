use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationMissingArgument,
    ValidationInvalidArgument,
    ValidationInvalidJson,

    HostNotFound,
    HostBusy,
    ApplicationNotFound,
    ApplicationRunning,
    DatabaseNotFound,
    CommandNotFound,

    SshCredentialMissing,
    SshIdentityFileNotFound,
    SshConnectFailed,

    RemoteCommandFailed,
    RemoteCommandTimeout,
    RemoteUploadFailed,

    DatabaseConnectFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",
            ErrorCode::ValidationInvalidJson => "validation.invalid_json",

            ErrorCode::HostNotFound => "host.not_found",
            ErrorCode::HostBusy => "host.busy",
            ErrorCode::ApplicationNotFound => "application.not_found",
            ErrorCode::ApplicationRunning => "application.running",
            ErrorCode::DatabaseNotFound => "database.not_found",
            ErrorCode::CommandNotFound => "command.not_found",

            ErrorCode::SshCredentialMissing => "ssh.credential_missing",
            ErrorCode::SshIdentityFileNotFound => "ssh.identity_file_not_found",
            ErrorCode::SshConnectFailed => "ssh.connect_failed",

            ErrorCode::RemoteCommandFailed => "remote.command_failed",
            ErrorCode::RemoteCommandTimeout => "remote.command_timeout",
            ErrorCode::RemoteUploadFailed => "remote.upload_failed",

            ErrorCode::DatabaseConnectFailed => "database.connect_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundDetails {
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        let message = format!("Missing required argument: {}", args.join(", "));
        Self::new(
            ErrorCode::ValidationMissingArgument,
            message,
            serde_json::json!({ "args": args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.clone(),
            id,
            tried,
        });

        Self::new(ErrorCode::ValidationInvalidArgument, problem, details)
    }

    pub fn validation_invalid_json(err: serde_json::Error, context: Option<String>) -> Self {
        let details = serde_json::json!({
            "error": err.to_string(),
            "context": context,
        });

        Self::new(
            ErrorCode::ValidationInvalidJson,
            format!("Invalid JSON: {}", err),
            details,
        )
    }

    pub fn config_missing_key(key: impl Into<String>, id: Option<String>) -> Self {
        let key = key.into();
        let message = match &id {
            Some(id) => format!("'{}' has no '{}' configured", id, key),
            None => format!("Missing required configuration key '{}'", key),
        };

        Self::new(
            ErrorCode::ConfigMissingKey,
            message,
            to_details(ConfigMissingKeyDetails { key, id }),
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        let path = path.into();
        let details = serde_json::json!({
            "path": path,
            "error": err.to_string(),
        });

        Self::new(
            ErrorCode::ConfigInvalidJson,
            format!("Invalid JSON in {}: {}", path, err),
            details,
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.clone(),
        });

        Self::new(ErrorCode::ConfigInvalidValue, problem, details)
    }

    pub fn host_not_found(id: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self::not_found(ErrorCode::HostNotFound, "Host not found", id, suggestions)
            .with_hint("Run 'datacenter host list' to see available hosts")
    }

    pub fn application_not_found(id: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self::not_found(
            ErrorCode::ApplicationNotFound,
            "Application not found",
            id,
            suggestions,
        )
        .with_hint("Run 'datacenter app list' to see available applications")
    }

    pub fn database_not_found(id: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self::not_found(
            ErrorCode::DatabaseNotFound,
            "Database not found",
            id,
            suggestions,
        )
        .with_hint("Run 'datacenter db list' to see available databases")
    }

    pub fn command_not_found(id: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self::not_found(
            ErrorCode::CommandNotFound,
            "Command not found",
            id,
            suggestions,
        )
        .with_hint("Run 'datacenter command list' to see available commands")
    }

    fn not_found(
        code: ErrorCode,
        message: &str,
        id: impl Into<String>,
        suggestions: Vec<String>,
    ) -> Self {
        let id = id.into();
        let message = format!("{}: {}", message, id);
        Self::new(code, message, to_details(NotFoundDetails { id, suggestions }))
    }

    pub fn host_busy(host_id: impl Into<String>) -> Self {
        let host_id = host_id.into();
        Self::new(
            ErrorCode::HostBusy,
            format!("Host '{}' has a command in flight", host_id),
            serde_json::json!({ "hostId": host_id }),
        )
        .retryable(true)
        .with_hint("Retry once the running command finishes, or run 'datacenter host reset'")
    }

    pub fn application_running(app_id: impl Into<String>) -> Self {
        let app_id = app_id.into();
        Self::new(
            ErrorCode::ApplicationRunning,
            format!("Application '{}' is running; stop it first", app_id),
            serde_json::json!({ "applicationId": app_id }),
        )
        .with_hint("Run 'datacenter app stop' before uninstalling")
    }

    pub fn ssh_credential_missing(host_id: impl Into<String>) -> Self {
        let host_id = host_id.into();
        Self::new(
            ErrorCode::SshCredentialMissing,
            format!("Host '{}' has no password or private key configured", host_id),
            serde_json::json!({ "hostId": host_id }),
        )
        .with_hint("Set 'privateKey', 'identityFile' or 'password' on the host")
    }

    pub fn ssh_identity_file_not_found(
        host_id: impl Into<String>,
        identity_file: impl Into<String>,
    ) -> Self {
        let host_id = host_id.into();
        let identity_file = identity_file.into();
        Self::new(
            ErrorCode::SshIdentityFileNotFound,
            format!("SSH identity file not found: {}", identity_file),
            serde_json::json!({ "hostId": host_id, "identityFile": identity_file }),
        )
    }

    pub fn ssh_connect_failed(host_id: impl Into<String>, detail: impl Into<String>) -> Self {
        let host_id = host_id.into();
        let detail = detail.into();
        Self::new(
            ErrorCode::SshConnectFailed,
            format!("Connection to '{}' failed: {}", host_id, detail),
            serde_json::json!({ "hostId": host_id, "error": detail }),
        )
        .retryable(true)
    }

    pub fn remote_command_failed(
        host_id: impl Into<String>,
        command: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        let host_id = host_id.into();
        let command = command.into();
        let detail = detail.into();
        Self::new(
            ErrorCode::RemoteCommandFailed,
            format!("Remote command failed on '{}': {}", host_id, detail.trim()),
            serde_json::json!({ "hostId": host_id, "command": command, "error": detail }),
        )
        .retryable(true)
    }

    pub fn remote_command_timeout(host_id: impl Into<String>, timeout_secs: u64) -> Self {
        let host_id = host_id.into();
        Self::new(
            ErrorCode::RemoteCommandTimeout,
            format!(
                "Command on '{}' did not finish within {}s",
                host_id, timeout_secs
            ),
            serde_json::json!({ "hostId": host_id, "timeoutSecs": timeout_secs }),
        )
        .retryable(true)
    }

    pub fn remote_upload_failed(path: impl Into<String>, detail: impl Into<String>) -> Self {
        let path = path.into();
        let detail = detail.into();
        Self::new(
            ErrorCode::RemoteUploadFailed,
            format!("Upload to {} failed: {}", path, detail.trim()),
            serde_json::json!({ "path": path, "error": detail }),
        )
    }

    pub fn database_connect_failed(db_id: impl Into<String>, detail: impl Into<String>) -> Self {
        let db_id = db_id.into();
        let detail = detail.into();
        Self::new(
            ErrorCode::DatabaseConnectFailed,
            format!("Connection to database '{}' failed: {}", db_id, detail),
            serde_json::json!({ "databaseId": db_id, "error": detail }),
        )
        .retryable(true)
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let error = error.into();
        let message = match &context {
            Some(ctx) => format!("I/O error ({}): {}", ctx, error),
            None => format!("I/O error: {}", error),
        };
        Self::new(
            ErrorCode::InternalIoError,
            message,
            serde_json::json!({ "error": error, "context": context }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::InternalJsonError,
            format!("JSON error: {}", error),
            serde_json::json!({ "error": error, "context": context }),
        )
    }

    pub fn internal_unexpected(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            message,
            Value::Object(serde_json::Map::new()),
        )
    }
}
