//! Clipboard writes through the platform's clipboard command

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::tools::{Tool, ToolArgs, ToolHandler, ToolOutput, required_str};
use crate::{Error, Result};

/// Known clipboard writers, in preference order
const WRITERS: &[(&str, &[&str])] = &[
    ("pbcopy", &[]),
    ("wl-copy", &[]),
    ("xclip", &["-selection", "clipboard"]),
    ("xsel", &["--clipboard", "--input"]),
    ("clip.exe", &[]),
];

/// First clipboard writer found on `PATH`
#[must_use]
pub fn find_writer() -> Option<(&'static str, &'static [&'static str])> {
    WRITERS
        .iter()
        .copied()
        .find(|(bin, _)| which::which(bin).is_ok())
}

struct ClipboardHandler;

#[async_trait]
impl ToolHandler for ClipboardHandler {
    async fn call(&self, args: &ToolArgs) -> Result<ToolOutput> {
        let text = required_str(args, "text")?;
        let (program, program_args) =
            find_writer().ok_or_else(|| Error::Tool("no clipboard command available".to_string()))?;

        let mut child = Command::new(program)
            .args(program_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Tool(format!("failed to spawn {program}: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Tool(format!("{program} failed: {}", stderr.trim())));
        }

        tracing::debug!(program, chars = text.chars().count(), "clipboard written");
        Ok(ToolOutput::Text(format!(
            "Copied {} characters to the clipboard",
            text.chars().count()
        )))
    }
}

/// The `clipboard_write` tool
#[must_use]
pub fn tool() -> Tool {
    Tool::new(
        "clipboard_write",
        "Copy text to the user's clipboard.",
        ClipboardHandler,
    )
    .parameters(json!({
        "type": "object",
        "properties": {
            "text": {
                "type": "string",
                "description": "The exact text to copy"
            }
        },
        "required": ["text"]
    }))
    .action()
    .usage_rule("clipboard_write: copy something to the clipboard")
}
