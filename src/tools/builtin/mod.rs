//! Built-in tools
//!
//! The registry is assembled once at startup from configuration and the
//! ports the tools need. Web search and weather pick their provider from the
//! configured keys; the shell tool is only present when enabled.

pub mod calculate;
pub mod clipboard;
pub mod clock;
pub mod location;
pub mod remember;
pub mod screenshot;
pub mod self_control;
pub mod shell;
pub mod weather;

use std::sync::Arc;

pub use self_control::{THEMES, UiAction, UiControl};

use super::{SearchProvider, Tool, ToolRegistry, ToolRegistryBuilder, WebSearchTool};
use crate::config::ToolsConfig;
use crate::db::FactStore;

fn web_search(config: &ToolsConfig) -> Tool {
    let provider = SearchProvider::from_keys(
        config.brave_api_key.as_deref(),
        config.serper_api_key.as_deref(),
    );
    Tool::new(
        "web_search",
        "Search the web. ONLY use this tool when the user explicitly asks to search or look something up online, or when the question requires very recent real-time information like today's news, live scores, or current prices.",
        WebSearchTool::new(provider),
    )
    .parameters(serde_json::json!({
        "type": "object",
        "properties": {
            "query": {"type": "string", "description": "The search query"}
        },
        "required": ["query"]
    }))
    .usage_rule("web_search: ONLY for news, current events, live scores, prices, or an explicit request to search online")
}

/// Add every built-in tool to a registry builder
#[must_use]
pub fn register_builtins(
    mut builder: ToolRegistryBuilder,
    config: &ToolsConfig,
    facts: Arc<dyn FactStore>,
    ui: Arc<dyn UiControl>,
) -> ToolRegistryBuilder {
    builder = builder
        .register(self_control::tool(ui))
        .register(web_search(config))
        .register(clock::tool())
        .register(calculate::tool())
        .register(location::tool())
        .register(screenshot::tool())
        .register(remember::tool(facts))
        .register(clipboard::tool());

    match &config.openweathermap_api_key {
        Some(key) => builder = builder.register(weather::tool(key.clone())),
        None => tracing::info!("no OpenWeatherMap key configured, get_weather disabled"),
    }

    if config.shell_enabled {
        builder = builder.register(shell::tool());
    }

    builder
}

/// The registry used by the assistant
#[must_use]
pub fn default_registry(
    config: &ToolsConfig,
    facts: Arc<dyn FactStore>,
    ui: Arc<dyn UiControl>,
) -> ToolRegistry {
    register_builtins(ToolRegistry::builder(), config, facts, ui).build()
}
