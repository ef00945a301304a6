//! External database command runner.
//!
//! Data sources describe their dump and restore tools as a program plus
//! argument templates. [`DatabaseCommand`] fills in the placeholders, passes
//! credentials through the environment, and runs the program under the
//! database timeout.
//!
//! Supported placeholders:
//!
//! | Placeholder         | Value                                   |
//! |---------------------|-----------------------------------------|
//! | `{catalog}`         | catalog being backed up or searched for |
//! | `{path}`            | dump file written or read               |
//! | `{restore_catalog}` | catalog restored into                   |
//! | `{restore_path}`    | directory for restored database files   |
//! | `{data_source}`     | data source name                        |
//!
//! When the timeout elapses the child process is killed.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use super::executor::ExecutionError;
use crate::core::target::{CommandSpec, DataSource};

/// Environment variable carrying the login user.
pub const USER_ENV: &str = "DB_USER";
/// Environment variable carrying the login password.
pub const PASSWORD_ENV: &str = "DB_PASSWORD";

/// Placeholder values for one command invocation.
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    values: BTreeMap<&'static str, String>,
}

impl Placeholders {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a placeholder value.
    pub fn set(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(name, value.into());
        self
    }

    /// Replace every known `{name}` in `template` in a single pass.
    ///
    /// Substituted values are never scanned again, and unknown tokens are
    /// kept as written.
    pub fn render(&self, template: &str) -> String {
        let mut rendered = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            rendered.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let known = after
                .find('}')
                .and_then(|close| self.values.get(&after[..close]).map(|v| (close, v)));
            match known {
                Some((close, value)) => {
                    rendered.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    rendered.push('{');
                    rest = after;
                }
            }
        }

        rendered.push_str(rest);
        rendered
    }
}

/// Captured output of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A fully rendered database command.
#[derive(Debug, Clone)]
pub struct DatabaseCommand {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    timeout: Duration,
}

impl DatabaseCommand {
    /// Render `spec` for `data_source` with the given placeholder values.
    pub fn new(
        spec: &CommandSpec,
        data_source: &DataSource,
        placeholders: &Placeholders,
        timeout: Duration,
    ) -> Self {
        let placeholders = placeholders.clone().set("data_source", &data_source.name);
        let env = data_source
            .credentials()
            .map(|(user, password)| {
                vec![
                    (USER_ENV.to_string(), user.to_string()),
                    (PASSWORD_ENV.to_string(), password.to_string()),
                ]
            })
            .unwrap_or_default();

        Self {
            program: spec.program.clone(),
            args: spec.args.iter().map(|a| placeholders.render(a)).collect(),
            env,
            timeout,
        }
    }

    /// Get the program being executed.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Get the rendered arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Get the timeout duration.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether credentials are passed to the child.
    pub fn has_credentials(&self) -> bool {
        !self.env.is_empty()
    }

    /// Run the command to completion.
    pub async fn run(&self) -> Result<CommandOutput, ExecutionError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!(program = %self.program, args = ?self.args, "Running database command");

        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ExecutionError::Timeout {
                program: self.program.clone(),
                timeout: self.timeout,
            })?
            .map_err(|e| ExecutionError::SpawnFailed {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            Ok(CommandOutput { stdout, stderr })
        } else {
            Err(ExecutionError::CommandFailed {
                program: self.program.clone(),
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            })
        }
    }
}
