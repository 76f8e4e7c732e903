//! # Clients
//!
//! Production implementations of the collaborator traits: the Vanta failure
//! source, the GitHub hosting service, the HTTP fix generator, git checkouts
//! and the terraform validator. Shared plumbing for HTTP and child
//! processes lives here.

pub mod generator;
pub mod git;
pub mod github;
pub mod terraform;
pub mod vanta;

pub use generator::HttpFixGenerator;
pub use git::GitCheckout;
pub use github::GitHubHosting;
pub use terraform::TerraformValidator;
pub use vanta::VantaFailureSource;

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use error_handling_rs::{redact_secrets, Error, Result};
use reqwest::{header, Client, Response};
use tokio::process::Command;
use tracing::debug;

const USER_AGENT: &str = concat!("TerraFix/", env!("CARGO_PKG_VERSION"));

/// Longest response body excerpt carried in an error message.
const BODY_EXCERPT: usize = 500;

/// HTTP client with the service user agent and JSON accept header.
pub fn build_http_client(timeout: Duration) -> Result<Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

    Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| Error::configuration(format!("Failed to build HTTP client: {}", e)))
}

/// Redacted, truncated body of an unsuccessful response.
pub(crate) async fn error_excerpt(response: Response) -> String {
    let text = response.text().await.unwrap_or_default();
    let excerpt: String = text.chars().take(BODY_EXCERPT).collect();
    redact_secrets(&excerpt)
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{program} is not installed")]
    NotInstalled { program: String },

    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs `program` to completion in `cwd`, killing it after `timeout`.
pub async fn run_command(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> std::result::Result<CommandOutput, CommandError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("TF_IN_AUTOMATION", "1")
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    debug!(program = %program, args = ?args, "Running command");

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Err(_) => {
            return Err(CommandError::TimedOut {
                program: program.to_string(),
                timeout,
            })
        }
        Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
            return Err(CommandError::NotInstalled {
                program: program.to_string(),
            })
        }
        Ok(Err(e)) => {
            return Err(CommandError::Spawn {
                program: program.to_string(),
                source: e,
            })
        }
        Ok(Ok(output)) => output,
    };

    Ok(CommandOutput {
        success: output.status.success(),
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_program_is_reported_as_not_installed() {
        let err = run_command(
            "terrafix-definitely-not-a-binary",
            &["--version"],
            None,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CommandError::NotInstalled { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_exit_status_and_output() {
        let out = run_command("sh", &["-c", "echo out; echo err >&2; exit 3"], None, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_program_times_out() {
        let err = run_command("sleep", &["5"], None, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
    }

    #[test]
    fn client_builds() {
        assert!(build_http_client(Duration::from_secs(5)).is_ok());
    }
}
