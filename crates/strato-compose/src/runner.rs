use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use strato_common::{ClusterName, Result, StratoError};

/// Drives the external compose tool for one project.
#[async_trait]
pub trait ComposeRunner: Send + Sync {
    /// Start the stack in `file` detached, scoped by `project`.
    async fn up(&self, project: &ClusterName, file: &Path) -> Result<()>;

    /// Stop and remove the stack's containers and networks.
    async fn down(&self, project: &ClusterName, file: &Path) -> Result<()>;
}

/// Program plus leading arguments used to invoke compose, e.g.
/// `docker-compose` or `docker compose`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeCommand {
    program: String,
    leading_args: Vec<String>,
}

impl ComposeCommand {
    pub fn new<I, S>(program: impl Into<String>, leading_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            leading_args: leading_args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a whitespace separated command line. Returns None when empty.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program, parts))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Full argument list after the program for one compose action.
    pub fn args(&self, project: &ClusterName, file: &Path, action: &[&str]) -> Vec<String> {
        let mut out = self.leading_args.clone();
        out.push("-p".to_string());
        out.push(project.to_string());
        out.push("-f".to_string());
        out.push(file.display().to_string());
        out.extend(action.iter().map(|a| a.to_string()));
        out
    }
}

impl Default for ComposeCommand {
    fn default() -> Self {
        Self::new("docker-compose", Vec::<String>::new())
    }
}

/// Runs compose as a child process and waits for it.
#[derive(Debug, Clone, Default)]
pub struct CliComposeRunner {
    command: ComposeCommand,
    timeout: Option<Duration>,
}

impl CliComposeRunner {
    pub fn new(command: ComposeCommand) -> Self {
        Self {
            command,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, project: &ClusterName, file: &Path, action: &[&str]) -> Result<()> {
        let args = self.command.args(project, file, action);
        tracing::info!(
            program = %self.command.program,
            args = ?args,
            %project,
            "running compose"
        );

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| {
                    tracing::error!(%project, ?limit, "compose timed out");
                    StratoError::ComposeTimeout(limit)
                })?,
            None => cmd.output().await,
        }
        .map_err(|e| StratoError::io(&self.command.program, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            tracing::debug!(%project, stdout = %stdout.trim(), "compose output");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::error!(%project, status = %output.status, %stderr, "compose failed");
            return Err(StratoError::ComposeFailed {
                status: output.status,
                stderr,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ComposeRunner for CliComposeRunner {
    async fn up(&self, project: &ClusterName, file: &Path) -> Result<()> {
        self.run(project, file, &["up", "-d"]).await
    }

    async fn down(&self, project: &ClusterName, file: &Path) -> Result<()> {
        self.run(project, file, &["down", "--remove-orphans"]).await
    }
}
