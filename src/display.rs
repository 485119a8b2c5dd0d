//! Display sink and the terminal front end
//!
//! The core only notifies the display; nothing it returns is consumed.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::llm::Role;
use crate::state::{InteractionMode, RecordingState};
use crate::tools::{UiAction, UiControl};
use crate::{Error, Result};

/// Receives state and message notifications
pub trait DisplaySink: Send + Sync {
    /// State or mode changed, with a short status line
    fn status(&self, state: RecordingState, mode: InteractionMode, text: &str);

    /// A complete message
    fn message(&self, role: Role, text: &str);

    /// A streamed assistant message starts
    fn begin_stream(&self);

    /// Next streamed delta
    fn token(&self, text: &str);

    /// The streamed message is complete
    fn end_stream(&self);

    /// A tool ran
    fn tool_activity(&self, _tool: &str, _preview: &str) {}

    /// Something went wrong; `text` is user-facing
    fn error(&self, text: &str);
}

/// ANSI colors for the assistant label, the user label, and status lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Palette {
    assistant: &'static str,
    user: &'static str,
    status: &'static str,
}

fn palette(theme: &str) -> Palette {
    match theme {
        "midnight" => Palette {
            assistant: "\x1b[94m",
            user: "\x1b[95m",
            status: "\x1b[34m",
        },
        "terminal" => Palette {
            assistant: "\x1b[92m",
            user: "\x1b[32m",
            status: "\x1b[32m",
        },
        "sunset" => Palette {
            assistant: "\x1b[93m",
            user: "\x1b[91m",
            status: "\x1b[33m",
        },
        "ocean" => Palette {
            assistant: "\x1b[96m",
            user: "\x1b[94m",
            status: "\x1b[36m",
        },
        _ => Palette {
            assistant: "\x1b[36m",
            user: "\x1b[32m",
            status: "\x1b[90m",
        },
    }
}

const RESET: &str = "\x1b[0m";

/// Interface state the self-control tool changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiState {
    pub theme: String,
    pub status_bar: bool,
    pub chat_visible: bool,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            theme: "default".to_string(),
            status_bar: true,
            chat_visible: true,
        }
    }
}

/// Terminal front end: prints to stdout and applies interface actions
pub struct TerminalDisplay {
    assistant_name: String,
    user_name: String,
    ui: Mutex<UiState>,
    muted: Arc<AtomicBool>,
    mode_requests: Option<mpsc::UnboundedSender<InteractionMode>>,
}

impl TerminalDisplay {
    #[must_use]
    pub fn new(assistant_name: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            assistant_name: assistant_name.into(),
            user_name: user_name.into(),
            ui: Mutex::new(UiState::default()),
            muted: Arc::new(AtomicBool::new(false)),
            mode_requests: None,
        }
    }

    /// Forward `set_mode` actions to the input task
    #[must_use]
    pub fn with_mode_requests(mut self, tx: mpsc::UnboundedSender<InteractionMode>) -> Self {
        self.mode_requests = Some(tx);
        self
    }

    /// Shared mute flag read by the turn controller
    #[must_use]
    pub fn muted(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.muted)
    }

    /// Snapshot of the interface state
    #[must_use]
    pub fn ui_state(&self) -> UiState {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, UiState> {
        self.ui.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn palette(&self) -> Palette {
        palette(&self.lock().theme)
    }

    fn print(text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

impl DisplaySink for TerminalDisplay {
    fn status(&self, state: RecordingState, mode: InteractionMode, text: &str) {
        if !self.lock().status_bar {
            return;
        }
        let p = self.palette();
        Self::print(&format!("{}[{mode} · {state:?}] {text}{RESET}\n", p.status));
    }

    fn message(&self, role: Role, text: &str) {
        if !self.lock().chat_visible {
            return;
        }
        let p = self.palette();
        let (color, name) = match role {
            Role::User => (p.user, self.user_name.as_str()),
            Role::Assistant => (p.assistant, self.assistant_name.as_str()),
            Role::System => (p.status, "system"),
        };
        Self::print(&format!("{color}{name}:{RESET} {text}\n"));
    }

    fn begin_stream(&self) {
        if !self.lock().chat_visible {
            return;
        }
        let p = self.palette();
        Self::print(&format!("{}{}:{RESET} ", p.assistant, self.assistant_name));
    }

    fn token(&self, text: &str) {
        if self.lock().chat_visible {
            Self::print(text);
        }
    }

    fn end_stream(&self) {
        if self.lock().chat_visible {
            Self::print("\n");
        }
    }

    fn tool_activity(&self, tool: &str, preview: &str) {
        if !self.lock().status_bar {
            return;
        }
        let p = self.palette();
        Self::print(&format!("{}  ↳ {tool}: {preview}{RESET}\n", p.status));
    }

    fn error(&self, text: &str) {
        Self::print(&format!("\x1b[31m{text}{RESET}\n"));
    }
}

impl UiControl for TerminalDisplay {
    fn apply(&self, action: &UiAction) -> Result<String> {
        match action {
            UiAction::SetTheme(theme) => self.lock().theme.clone_from(theme),
            UiAction::ShowStatusBar => self.lock().status_bar = true,
            UiAction::HideStatusBar => self.lock().status_bar = false,
            UiAction::ShowChat => self.lock().chat_visible = true,
            UiAction::HideChat => self.lock().chat_visible = false,
            UiAction::ClearChat => Self::print("\x1b[2J\x1b[H"),
            UiAction::Mute => self.muted.store(true, Ordering::SeqCst),
            UiAction::Unmute => self.muted.store(false, Ordering::SeqCst),
            UiAction::SetMode(mode) => {
                let tx = self
                    .mode_requests
                    .as_ref()
                    .ok_or_else(|| Error::Tool("mode switching is not available here".to_string()))?;
                tx.send(*mode)
                    .map_err(|_| Error::Tool("input task is not running".to_string()))?;
            }
        }

        tracing::debug!(action = action.name(), "interface updated");
        Ok(format!("I {action}."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_update_state() {
        let display = TerminalDisplay::new("Parley", "You");

        display.apply(&UiAction::SetTheme("sunset".to_string())).unwrap();
        display.apply(&UiAction::HideStatusBar).unwrap();
        display.apply(&UiAction::HideChat).unwrap();
        assert_eq!(
            display.ui_state(),
            UiState {
                theme: "sunset".to_string(),
                status_bar: false,
                chat_visible: false,
            }
        );

        let muted = display.muted();
        let confirmation = display.apply(&UiAction::Mute).unwrap();
        assert_eq!(confirmation, "I muted speech output.");
        assert!(muted.load(Ordering::SeqCst));
    }

    #[test]
    fn mode_requests_are_forwarded() {
        assert!(
            TerminalDisplay::new("Parley", "You")
                .apply(&UiAction::SetMode(InteractionMode::Chat))
                .is_err()
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let display = TerminalDisplay::new("Parley", "You").with_mode_requests(tx);
        display.apply(&UiAction::SetMode(InteractionMode::Chat)).unwrap();
        assert_eq!(rx.try_recv().unwrap(), InteractionMode::Chat);
    }

    #[test]
    fn every_theme_has_a_palette() {
        for theme in crate::tools::THEMES {
            let _ = palette(theme);
        }
        assert_ne!(palette("ocean"), palette("default"));
    }
}
