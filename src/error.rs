// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Invalid request: {0}")]
    #[diagnostic(code(cloudport::request::invalid))]
    Validation(String),

    #[error("Container not found: {0}")]
    #[diagnostic(
        code(cloudport::container::not_found),
        help("List visible containers with `cloudport list`")
    )]
    NotFound(String),

    #[error("Access denied to container '{container}' for user '{user}'")]
    #[diagnostic(
        code(cloudport::container::forbidden),
        help("Containers can only be managed by their owning tenant or an admin")
    )]
    Forbidden { user: String, container: String },

    #[error("Container already exists: {0}")]
    #[diagnostic(code(cloudport::container::conflict))]
    Conflict(String),

    #[error("Backend failed to {operation}: {message}")]
    #[diagnostic(
        code(cloudport::backend::error),
        help("Check that the configured container backend is reachable")
    )]
    Backend { operation: String, message: String },

    #[error("Timed out after {}s waiting for backend to {operation}", .after.as_secs())]
    #[diagnostic(
        code(cloudport::backend::timeout),
        help("Increase `timeouts.backend` in cloudport.yaml if the backend is slow")
    )]
    Timeout { operation: String, after: Duration },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Database error: {0}")]
    #[diagnostic(code(cloudport::database::error))]
    Persistence(#[from] tokio_rusqlite::Error),

    #[error("Corrupt record in '{table}': {reason}")]
    #[diagnostic(code(cloudport::database::corrupt))]
    CorruptRecord { table: String, reason: String },

    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(cloudport::config::error),
        help("Check cloudport.yaml or pass --config explicitly")
    )]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap a backend-specific failure, keeping the attempted operation.
    pub fn backend(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Error::Backend {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// True for failures that leave the container in a failed state
    /// (as opposed to requests rejected before touching it).
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Error::Backend { .. } | Error::Timeout { .. } | Error::Cancelled(_)
        )
    }

    /// Process exit code for the command-line front end.
    ///
    /// Mirrors the HTTP status families: 2 for 400, 3 for 403, 4 for 404,
    /// 5 for 409 and 1 for everything that would be a 500.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation(_) => 2,
            Error::Forbidden { .. } => 3,
            Error::NotFound(_) => 4,
            Error::Conflict(_) => 5,
            _ => 1,
        }
    }

    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::NotFound(id) => Some(format!(
                "No container '{}' is visible to you. Run `cloudport list` to see your containers.",
                id
            )),
            Error::Forbidden { .. } => Some(
                "Use --role admin for platform-wide access, or --tenant to act as the owning tenant."
                    .to_string(),
            ),
            Error::Conflict(id) => Some(format!(
                "Pick another name, or remove the existing container with: cloudport remove {}",
                id
            )),
            Error::Backend { message, .. } => {
                if message.contains("docker.sock") || message.contains("Connection refused") {
                    Some("Check that Docker is running: docker ps".to_string())
                } else if message.contains("az login") || message.contains("Please run 'az login'")
                {
                    Some("Authenticate the Azure CLI first: az login".to_string())
                } else if message.contains("No such file") || message.contains("not found") {
                    Some("Check that the backend CLI is installed and on PATH".to_string())
                } else {
                    None
                }
            }
            Error::Timeout { .. } => Some(
                "The container was marked as 'error'. Retry the operation once the backend responds."
                    .to_string(),
            ),
            Error::Persistence(e) => {
                // tokio_rusqlite wraps the underlying rusqlite error opaquely,
                // so string matching is the only option here.
                let err_str = e.to_string();
                if err_str.contains("database is locked") || err_str.contains("SQLITE_BUSY") {
                    Some("Another cloudport process holds the database. Retry shortly.".to_string())
                } else {
                    Some(
                        "Check `database.path` in cloudport.yaml and that its directory is writable."
                            .to_string(),
                    )
                }
            }
            Error::Config(_) | Error::Yaml(_) => {
                Some("Validate cloudport.yaml against the documented sections.".to_string())
            }
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}
