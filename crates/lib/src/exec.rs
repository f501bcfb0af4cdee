//! Safe execution layer: run allowlisted command lines only.
//! No shell is used; the line is split into a program and arguments.

use tokio::process::Command;

/// Output of a successfully exited command. A command may succeed and still
/// produce stderr; callers decide how to surface it.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command not authorized: {0}")]
    NotAuthorized(String),
    #[error("empty command")]
    Empty,
    #[error("failed to start command: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("command exited with {status}: {stderr}")]
    Failed {
        status: std::process::ExitStatus,
        stdout: String,
        stderr: String,
    },
}

/// Allowlist of exact command lines (e.g. "ls -la", "git status").
#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    authorized: Vec<String>,
}

impl CommandPolicy {
    pub fn new(authorized: Vec<String>) -> Self {
        Self { authorized }
    }

    /// True when the trimmed line exactly matches an authorized entry.
    pub fn is_allowed(&self, command: &str) -> bool {
        let command = command.trim();
        self.authorized.iter().any(|c| c == command)
    }

    /// Run an authorized command line. The line is split on whitespace; the
    /// first token is the program, the rest are arguments.
    pub async fn run(&self, command: &str) -> Result<CommandOutput, CommandError> {
        let command = command.trim();
        if !self.is_allowed(command) {
            return Err(CommandError::NotAuthorized(command.to_string()));
        }
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or(CommandError::Empty)?;
        let output = Command::new(program).args(parts).output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.success() {
            Ok(CommandOutput { stdout, stderr })
        } else {
            Err(CommandError::Failed {
                status: output.status,
                stdout,
                stderr,
            })
        }
    }
}
