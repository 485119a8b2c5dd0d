//! Explicit "remember this" requests

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::Result;
use crate::db::FactStore;
use crate::tools::{Tool, ToolArgs, ToolHandler, ToolOutput, required_str};

struct RememberHandler {
    facts: Arc<dyn FactStore>,
}

#[async_trait]
impl ToolHandler for RememberHandler {
    async fn call(&self, args: &ToolArgs) -> Result<ToolOutput> {
        let fact = required_str(args, "fact")?;
        let added = self.facts.append_facts(&[fact.to_string()])?;

        let text = if added == 0 {
            format!("Already remembered: {fact}")
        } else {
            format!("Remembered: {fact}")
        };
        Ok(ToolOutput::Text(text))
    }
}

/// The `remember` tool
#[must_use]
pub fn tool(facts: Arc<dyn FactStore>) -> Tool {
    Tool::new(
        "remember",
        "Store a fact about the user for future conversations.",
        RememberHandler { facts },
    )
    .parameters(json!({
        "type": "object",
        "properties": {
            "fact": {
                "type": "string",
                "description": "The fact to remember, phrased about the user (e.g. 'Prefers metric units')"
            }
        },
        "required": ["fact"]
    }))
    .action()
    .usage_rule("remember: ONLY when the user explicitly asks you to remember something")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{FactRepo, init_memory};

    #[tokio::test]
    async fn stores_once() {
        let repo = Arc::new(FactRepo::new(init_memory().unwrap()));
        let tool = tool(repo.clone());

        let mut args = ToolArgs::new();
        args.insert("fact".to_string(), "Birthday is in May".into());

        assert_eq!(
            tool.call(&args).await.unwrap(),
            ToolOutput::Text("Remembered: Birthday is in May".to_string())
        );
        assert_eq!(
            tool.call(&args).await.unwrap(),
            ToolOutput::Text("Already remembered: Birthday is in May".to_string())
        );
        assert_eq!(repo.list_facts().unwrap().len(), 1);
    }
}
