//! Approximate location from IP geolocation

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::Result;
use crate::tools::{Tool, ToolArgs, ToolHandler, ToolOutput};

#[derive(Debug, Default, Deserialize)]
struct IpInfo {
    city: Option<String>,
    region: Option<String>,
    country: Option<String>,
    loc: Option<String>,
}

fn format_location(info: &IpInfo) -> String {
    let field = |v: &Option<String>| v.clone().unwrap_or_else(|| "Unknown".to_string());
    format!(
        "Current location (approximate, based on IP):\n  City: {}\n  Region: {}\n  Country: {}\n  Coordinates: {}",
        field(&info.city),
        field(&info.region),
        field(&info.country),
        field(&info.loc)
    )
}

struct LocationHandler {
    client: reqwest::Client,
}

#[async_trait]
impl ToolHandler for LocationHandler {
    async fn call(&self, _args: &ToolArgs) -> Result<ToolOutput> {
        let info: IpInfo = self
            .client
            .get("https://ipinfo.io/json")
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(ToolOutput::Text(format_location(&info)))
    }
}

/// The `get_location` tool
#[must_use]
pub fn tool() -> Tool {
    Tool::new(
        "get_location",
        "Get the user's current location based on their IP address. Use this ONLY when the user asks where they are or their current location.",
        LocationHandler {
            client: reqwest::Client::new(),
        },
    )
    .usage_rule("get_location: ONLY when the user asks where they are")
}
