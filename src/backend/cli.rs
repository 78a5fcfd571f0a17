//! Bounded subprocess runner for backend command-line tools.
//!
//! Every invocation of an external CLI (today: `az`) goes through
//! [`CliRunner`], which applies a per-call timeout, limits how many
//! subprocesses run at once and maps failures to [`CliError`]. Secret
//! values are masked in every command string that reaches an error or a log.

use std::process::Output;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

const MASK: &str = "***";

/// Flags whose following argument is always a secret.
const SECRET_FLAGS: [&str; 3] = ["--registry-password", "--password", "--secrets"];

/// Environment-variable names containing any of these are masked in `K=V` args.
const SECRET_KEY_HINTS: [&str; 4] = ["PASSWORD", "SECRET", "TOKEN", "KEY"];

/// Structured failure of a CLI invocation.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Timed out running '{command}' (exceeded {} seconds)", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error(
        "'{command}' failed{}: {stderr}",
        exit_code.map(|c| format!(" (exit code {})", c)).unwrap_or_default()
    )]
    CommandFailed {
        command: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    #[error("Failed to execute '{command}': {source}")]
    ExecFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },
}

impl CliError {
    pub fn timeout(cmd: impl Into<String>, dur: Duration) -> Self {
        CliError::Timeout {
            command: cmd.into(),
            timeout: dur,
        }
    }

    /// Create a command-failed error from an `std::process::Output`.
    pub fn failed(cmd: impl Into<String>, output: &Output) -> Self {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        CliError::CommandFailed {
            command: cmd.into(),
            stderr,
            exit_code: output.status.code(),
        }
    }

    pub fn exec_failed(cmd: impl Into<String>, err: std::io::Error) -> Self {
        CliError::ExecFailed {
            command: cmd.into(),
            source: err,
        }
    }

    /// True when the tool reported that the target resource does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            CliError::NotFound { .. } => true,
            CliError::CommandFailed { stderr, .. } => {
                stderr.contains("ResourceNotFound")
                    || stderr.contains("was not found")
                    || stderr.contains("could not be found")
            }
            _ => false,
        }
    }
}

/// Runs one external program with shared concurrency and timeout limits.
///
/// Cheap to clone; clones share the same permit pool.
#[derive(Debug, Clone)]
pub struct CliRunner {
    program: String,
    permits: Arc<Semaphore>,
    secrets: Vec<String>,
}

impl CliRunner {
    pub fn new(program: impl Into<String>, max_concurrent: usize) -> Self {
        Self {
            program: program.into(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            secrets: Vec::new(),
        }
    }

    /// Register a literal value that must never appear in logs or errors.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.secrets.push(secret);
        }
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Command line as it may be shown to a human, secrets masked.
    pub fn display_command(&self, args: &[String]) -> String {
        let mut shown = Vec::with_capacity(args.len() + 1);
        shown.push(self.program.clone());

        let mut mask_next = false;
        for arg in args {
            if mask_next {
                shown.push(MASK.to_string());
                mask_next = false;
                continue;
            }
            if SECRET_FLAGS.contains(&arg.as_str()) {
                mask_next = true;
                shown.push(arg.clone());
                continue;
            }
            shown.push(self.mask_arg(arg));
        }
        shown.join(" ")
    }

    fn mask_arg(&self, arg: &str) -> String {
        if let Some((key, _)) = arg.split_once('=') {
            let upper = key.to_ascii_uppercase();
            if SECRET_KEY_HINTS.iter().any(|hint| upper.contains(hint)) {
                return format!("{}={}", key, MASK);
            }
        }
        let mut masked = arg.to_string();
        for secret in &self.secrets {
            if masked.contains(secret.as_str()) {
                masked = masked.replace(secret.as_str(), MASK);
            }
        }
        masked
    }

    /// Run the program with a timeout, returning raw Output.
    ///
    /// Waits for a permit first; the timeout covers only the subprocess.
    pub async fn run(&self, args: &[String], timeout: Duration) -> Result<Output, CliError> {
        let cmd_str = self.display_command(args);

        // The semaphore is never closed, so acquire only fails if that changes.
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| CliError::exec_failed(&cmd_str, std::io::Error::other(e)))?;

        tracing::debug!("Running: {}", cmd_str);

        let result = tokio::time::timeout(
            timeout,
            tokio::process::Command::new(&self.program)
                .args(args)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(CliError::exec_failed(cmd_str, e)),
            Err(_) => Err(CliError::timeout(cmd_str, timeout)),
        }
    }

    /// Run the program and return trimmed stdout, or an error on non-zero exit.
    pub async fn run_success(
        &self,
        args: &[String],
        timeout: Duration,
    ) -> Result<String, CliError> {
        let output = self.run(args, timeout).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(CliError::failed(self.display_command(args), &output))
        }
    }
}
