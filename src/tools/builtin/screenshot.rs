//! Screen capture for the vision model

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::tools::{Tool, ToolArgs, ToolHandler, ToolOutput};
use crate::{Error, Result};

/// Capture commands, in preference order; the output path is appended
const CAPTURERS: &[(&str, &[&str])] = &[
    ("screencapture", &["-x"]),
    ("grim", &[]),
    ("gnome-screenshot", &["-f"]),
    ("scrot", &["-o"]),
    ("import", &["-window", "root"]),
];

fn find_capturer() -> Option<(&'static str, &'static [&'static str])> {
    CAPTURERS
        .iter()
        .copied()
        .find(|(bin, _)| which::which(bin).is_ok())
}

async fn capture_to(program: &str, args: &[&str], path: &Path) -> Result<Vec<u8>> {
    let output = Command::new(program)
        .args(args)
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| Error::Tool(format!("failed to run {program}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Tool(format!("{program} failed: {}", stderr.trim())));
    }

    let data = tokio::fs::read(path).await?;
    if data.is_empty() {
        return Err(Error::Tool(format!("{program} produced an empty image")));
    }
    Ok(data)
}

struct ScreenshotHandler;

#[async_trait]
impl ToolHandler for ScreenshotHandler {
    async fn call(&self, _args: &ToolArgs) -> Result<ToolOutput> {
        let (program, args) = find_capturer()
            .ok_or_else(|| Error::Tool("no screenshot command available".to_string()))?;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("screen.png");
        let data = capture_to(program, args, &path).await?;

        tracing::debug!(program, bytes = data.len(), "screen captured");
        Ok(ToolOutput::Image {
            data,
            mime_type: "image/png".to_string(),
        })
    }
}

/// The `screenshot` tool
#[must_use]
pub fn tool() -> Tool {
    Tool::new(
        "screenshot",
        "Look at the user's screen and describe what is visible.",
        ScreenshotHandler,
    )
    .captures_screen()
    .usage_rule("screenshot: the user asks about what is on their screen or wants you to look at something")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_capture_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("screen.png");
        assert!(capture_to("false", &[], &path).await.is_err());
    }

    #[tokio::test]
    async fn reads_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("screen.png");
        // `cp` stands in for a capture command that writes its last argument
        let source = dir.path().join("source.png");
        std::fs::write(&source, b"\x89PNG").unwrap();

        let source = source.to_string_lossy().to_string();
        let data = capture_to("cp", &[&source], &path).await.unwrap();
        assert_eq!(data, b"\x89PNG");
    }

    #[test]
    fn is_flagged_for_window_bracketing() {
        assert!(tool().is_screen_capture());
    }
}
