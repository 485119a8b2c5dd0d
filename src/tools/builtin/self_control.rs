//! Self-control: actions the assistant performs on its own interface

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::state::InteractionMode;
use crate::tools::{SELF_CONTROL, Tool, ToolArgs, ToolHandler, ToolOutput, required_str, str_arg};
use crate::{Error, Result};

/// Themes the interface knows
pub const THEMES: &[&str] = &["default", "midnight", "terminal", "sunset", "ocean"];

/// One interface action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiAction {
    SetTheme(String),
    ShowStatusBar,
    HideStatusBar,
    ShowChat,
    HideChat,
    ClearChat,
    Mute,
    Unmute,
    SetMode(InteractionMode),
}

impl UiAction {
    /// Action name as it appears in tool arguments
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SetTheme(_) => "set_theme",
            Self::ShowStatusBar => "show_status_bar",
            Self::HideStatusBar => "hide_status_bar",
            Self::ShowChat => "show_chat",
            Self::HideChat => "hide_chat",
            Self::ClearChat => "clear_chat",
            Self::Mute => "mute",
            Self::Unmute => "unmute",
            Self::SetMode(_) => "set_mode",
        }
    }

    /// Parse `{"action": ..., "value": ...}`
    ///
    /// # Errors
    ///
    /// Returns error for an unknown action, a missing value, or an unknown theme
    pub fn from_args(args: &ToolArgs) -> Result<Self> {
        let action = required_str(args, "action")?;
        let value = str_arg(args, "value");

        let parsed = match action {
            "set_theme" => {
                let theme = value
                    .ok_or_else(|| Error::Tool("set_theme needs a value".to_string()))?
                    .to_lowercase();
                if !THEMES.contains(&theme.as_str()) {
                    return Err(Error::Tool(format!(
                        "unknown theme '{theme}', available: {}",
                        THEMES.join(", ")
                    )));
                }
                Self::SetTheme(theme)
            }
            "show_status_bar" => Self::ShowStatusBar,
            "hide_status_bar" => Self::HideStatusBar,
            "show_chat" => Self::ShowChat,
            "hide_chat" => Self::HideChat,
            "clear_chat" => Self::ClearChat,
            "mute" => Self::Mute,
            "unmute" => Self::Unmute,
            "set_mode" => {
                let mode = value.ok_or_else(|| Error::Tool("set_mode needs a value".to_string()))?;
                Self::SetMode(mode.parse().map_err(|_| {
                    Error::Tool(format!("unknown mode '{mode}', expected voice or chat"))
                })?)
            }
            other => return Err(Error::Tool(format!("unknown self-control action: {other}"))),
        };

        Ok(parsed)
    }

    /// Arguments for a planned call
    #[must_use]
    pub fn to_args(&self) -> ToolArgs {
        let mut args = ToolArgs::new();
        args.insert("action".to_string(), Value::from(self.name()));
        match self {
            Self::SetTheme(theme) => {
                args.insert("value".to_string(), Value::from(theme.as_str()));
            }
            Self::SetMode(mode) => {
                args.insert("value".to_string(), Value::from(mode.to_string()));
            }
            _ => {}
        }
        args
    }
}

impl fmt::Display for UiAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetTheme(theme) => write!(f, "switched the theme to {theme}"),
            Self::ShowStatusBar => f.write_str("showed the status bar"),
            Self::HideStatusBar => f.write_str("hid the status bar"),
            Self::ShowChat => f.write_str("showed the chat"),
            Self::HideChat => f.write_str("hid the chat"),
            Self::ClearChat => f.write_str("cleared the chat"),
            Self::Mute => f.write_str("muted speech output"),
            Self::Unmute => f.write_str("unmuted speech output"),
            Self::SetMode(mode) => write!(f, "switched to {mode} mode"),
        }
    }
}

/// Port through which the assistant drives its host interface
pub trait UiControl: Send + Sync {
    /// Apply an action, returning a confirmation line
    ///
    /// # Errors
    ///
    /// Returns error if the interface cannot perform the action
    fn apply(&self, action: &UiAction) -> Result<String>;

    /// Hide the assistant window before a screen capture
    fn hide_window(&self) {}

    /// Restore the window after a screen capture
    fn show_window(&self) {}
}

struct SelfControlHandler {
    ui: Arc<dyn UiControl>,
}

#[async_trait]
impl ToolHandler for SelfControlHandler {
    async fn call(&self, args: &ToolArgs) -> Result<ToolOutput> {
        let action = UiAction::from_args(args)?;
        tracing::info!(action = action.name(), "self-control");
        self.ui.apply(&action).map(ToolOutput::Text)
    }
}

/// The `self_control` tool bound to a UI port
#[must_use]
pub fn tool(ui: Arc<dyn UiControl>) -> Tool {
    Tool::new(
        SELF_CONTROL,
        "Control the assistant's own interface: theme, status bar, chat panel, mute, and mode.",
        SelfControlHandler { ui },
    )
    .parameters(json!({
        "type": "object",
        "properties": {
            "action": {
                "type": "string",
                "enum": [
                    "set_theme", "show_status_bar", "hide_status_bar", "show_chat",
                    "hide_chat", "clear_chat", "mute", "unmute", "set_mode"
                ],
                "description": "The interface action to perform"
            },
            "value": {
                "type": "string",
                "description": format!(
                    "Theme name for set_theme ({}), or voice/chat for set_mode",
                    THEMES.join(", ")
                )
            }
        },
        "required": ["action"]
    }))
    .action()
    .multi_instance()
    .usage_rule("self_control: change the assistant's own theme, status bar, chat panel, mute state, or mode")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingUi(Mutex<Vec<UiAction>>);

    impl UiControl for RecordingUi {
        fn apply(&self, action: &UiAction) -> Result<String> {
            self.0.lock().unwrap().push(action.clone());
            Ok(format!("I {action}."))
        }
    }

    #[test]
    fn args_round_trip_for_valued_actions() {
        for action in [
            UiAction::SetTheme("ocean".to_string()),
            UiAction::SetMode(InteractionMode::Chat),
            UiAction::HideStatusBar,
        ] {
            assert_eq!(UiAction::from_args(&action.to_args()).unwrap(), action);
        }
    }

    #[test]
    fn rejects_bad_values() {
        let mut args = UiAction::SetTheme("ocean".to_string()).to_args();
        args.insert("value".to_string(), Value::from("plaid"));
        assert!(UiAction::from_args(&args).is_err());

        let mut args = ToolArgs::new();
        args.insert("action".to_string(), Value::from("set_mode"));
        assert!(UiAction::from_args(&args).is_err());

        args.insert("action".to_string(), Value::from("self_destruct"));
        assert!(UiAction::from_args(&args).is_err());
    }

    #[tokio::test]
    async fn tool_applies_through_port() {
        let ui = Arc::new(RecordingUi::default());
        let tool = tool(ui.clone());
        assert!(tool.is_multi_instance());

        let output = tool.call(&UiAction::Mute.to_args()).await.unwrap();
        assert_eq!(output, ToolOutput::Text("I muted speech output.".to_string()));
        assert_eq!(*ui.0.lock().unwrap(), vec![UiAction::Mute]);
    }
}
