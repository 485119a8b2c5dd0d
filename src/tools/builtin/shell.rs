//! Shell command execution

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;
use tokio::time::timeout;

use crate::tools::{Tool, ToolArgs, ToolHandler, ToolOutput, required_str};
use crate::{Error, Result};

/// Default timeout for a shell command
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Output is cut to this many characters before reaching the model
const MAX_OUTPUT_CHARS: usize = 2000;

/// Runs `sh -c <command>`
pub struct ShellHandler {
    timeout: Duration,
}

impl ShellHandler {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run a command and describe the outcome
    ///
    /// # Errors
    ///
    /// Returns error if the command cannot be spawned or times out
    pub async fn run(&self, command: &str) -> Result<String> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Tool(format!("failed to spawn shell: {e}")))?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Tool(format!("command timed out after {:?}", self.timeout)))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !stderr.trim().is_empty() {
            tracing::debug!(command, stderr = %stderr.trim(), "shell stderr");
        }

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let detail = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
            return Ok(truncate(&format!("Ran `{command}` (exit code {code}): {detail}")));
        }

        if stdout.trim().is_empty() {
            Ok(format!("Ran `{command}`"))
        } else {
            Ok(truncate(&format!("Ran `{command}`: {}", stdout.trim())))
        }
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_OUTPUT_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_OUTPUT_CHARS).collect();
    format!("{cut}... (truncated)")
}

#[async_trait]
impl ToolHandler for ShellHandler {
    async fn call(&self, args: &ToolArgs) -> Result<ToolOutput> {
        let command = required_str(args, "command")?;
        self.run(command).await.map(ToolOutput::Text)
    }
}

/// The `execute_shell` tool
#[must_use]
pub fn tool() -> Tool {
    let opener = if cfg!(target_os = "macos") { "open -a <App>" } else { "xdg-open or the app's binary" };
    Tool::new(
        "execute_shell",
        "Run a shell command on the user's computer, e.g. to open an application.",
        ShellHandler::new(DEFAULT_TIMEOUT),
    )
    .parameters(json!({
        "type": "object",
        "properties": {
            "command": {
                "type": "string",
                "description": format!("The shell command to run (to open apps use {opener})")
            }
        },
        "required": ["command"]
    }))
    .action()
    .multi_instance()
    .usage_rule("execute_shell: open or launch an application, or run a command on the computer")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_output_and_failures() {
        let shell = ShellHandler::new(DEFAULT_TIMEOUT);

        assert_eq!(shell.run("echo hello").await.unwrap(), "Ran `echo hello`: hello");
        assert_eq!(shell.run("true").await.unwrap(), "Ran `true`");

        let failed = shell.run("echo nope >&2; exit 3").await.unwrap();
        assert_eq!(failed, "Ran `echo nope >&2; exit 3` (exit code 3): nope");
    }

    #[tokio::test]
    async fn times_out() {
        let shell = ShellHandler::new(Duration::from_millis(100));
        let err = shell.run("sleep 5").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn long_output_is_truncated() {
        let long = "x".repeat(MAX_OUTPUT_CHARS + 10);
        assert!(truncate(&long).ends_with("... (truncated)"));
    }
}
