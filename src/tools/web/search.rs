//! `web_search` tool
//!
//! Brave or Serper when a key is configured, otherwise the keyless
//! DuckDuckGo instant-answer API.

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::Result;
use crate::tools::{ToolArgs, ToolHandler, ToolOutput, required_str};

/// Hits handed to the model per query
const RESULT_LIMIT: usize = 5;

const BRAVE_URL: &str = "https://api.search.brave.com/res/v1/web/search";
const SERPER_URL: &str = "https://google.serper.dev/search";
const DUCKDUCKGO_URL: &str = "https://api.duckduckgo.com/";

/// Which backend answers queries
#[derive(Debug, Clone)]
pub enum SearchProvider {
    Brave { api_key: String },
    Serper { api_key: String },
    /// Instant answers only, no key required
    DuckDuckGo,
}

impl SearchProvider {
    /// Brave wins over Serper; no key at all falls back to DuckDuckGo
    #[must_use]
    pub fn from_keys(brave: Option<&str>, serper: Option<&str>) -> Self {
        if let Some(key) = brave {
            Self::Brave {
                api_key: key.to_string(),
            }
        } else if let Some(key) = serper {
            Self::Serper {
                api_key: key.to_string(),
            }
        } else {
            Self::DuckDuckGo
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::Brave { .. } => "brave",
            Self::Serper { .. } => "serper",
            Self::DuckDuckGo => "duckduckgo",
        }
    }
}

/// One search hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

impl SearchResult {
    fn new(title: impl Into<String>, url: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
        }
    }
}

#[derive(Deserialize)]
struct BravePage {
    web: Option<BraveHits>,
}

#[derive(Deserialize)]
struct BraveHits {
    results: Vec<BraveHit>,
}

#[derive(Deserialize)]
struct BraveHit {
    title: String,
    url: String,
    description: String,
}

#[derive(Deserialize)]
struct SerperPage {
    #[serde(default)]
    organic: Vec<SerperHit>,
}

#[derive(Deserialize)]
struct SerperHit {
    title: String,
    link: String,
    snippet: String,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InstantAnswer {
    heading: String,
    abstract_text: String,
    #[serde(rename = "AbstractURL")]
    abstract_url: String,
    answer: String,
    related_topics: Vec<RelatedTopic>,
}

/// Category groups have neither field
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RelatedTopic {
    text: Option<String>,
    #[serde(rename = "FirstURL")]
    first_url: Option<String>,
}

impl InstantAnswer {
    fn into_results(self) -> Vec<SearchResult> {
        let mut results = Vec::new();

        if !self.answer.is_empty() {
            results.push(SearchResult::new(&self.heading, "", self.answer));
        }
        if !self.abstract_text.is_empty() {
            results.push(SearchResult::new(self.heading, self.abstract_url, self.abstract_text));
        }

        results.extend(self.related_topics.into_iter().filter_map(|topic| {
            let (text, url) = (topic.text?, topic.first_url?);
            let title = text.split(" - ").next().unwrap_or(&text).to_string();
            Some(SearchResult::new(title, url, text))
        }));

        results
    }
}

/// Searches the web through the configured provider
pub struct WebSearchTool {
    provider: SearchProvider,
    client: reqwest::Client,
}

impl WebSearchTool {
    #[must_use]
    pub fn new(provider: SearchProvider) -> Self {
        Self {
            provider,
            client: reqwest::Client::new(),
        }
    }

    /// Run a query and return at most `limit` hits
    ///
    /// # Errors
    ///
    /// Returns error if the provider request fails or its response is malformed
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        tracing::debug!(provider = self.provider.label(), query, "web search");

        let mut results = match &self.provider {
            SearchProvider::Brave { api_key } => {
                let request = self
                    .client
                    .get(BRAVE_URL)
                    .header("X-Subscription-Token", api_key)
                    .query(&[("q", query), ("count", &limit.to_string())]);
                let page: BravePage = fetch(request).await?;
                page.web
                    .map(|web| web.results)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|hit| SearchResult::new(hit.title, hit.url, hit.description))
                    .collect()
            }
            SearchProvider::Serper { api_key } => {
                let request = self
                    .client
                    .post(SERPER_URL)
                    .header("X-API-KEY", api_key)
                    .json(&json!({ "q": query, "num": limit }));
                let page: SerperPage = fetch(request).await?;
                page.organic
                    .into_iter()
                    .map(|hit| SearchResult::new(hit.title, hit.link, hit.snippet))
                    .collect()
            }
            SearchProvider::DuckDuckGo => {
                let request = self.client.get(DUCKDUCKGO_URL).query(&[
                    ("q", query),
                    ("format", "json"),
                    ("no_html", "1"),
                    ("skip_disambig", "1"),
                ]);
                let answer: InstantAnswer = fetch(request).await?;
                answer.into_results()
            }
        };

        results.truncate(limit);
        Ok(results)
    }
}

async fn fetch<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T> {
    Ok(request.send().await?.error_for_status()?.json().await?)
}

/// Render hits as the text handed to the model
#[must_use]
pub fn format_results(query: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return format!("No results found for '{query}'.");
    }

    let lines = results.iter().enumerate().map(|(i, hit)| {
        let mut entry = format!("{}. {}", i + 1, hit.title);
        if !hit.snippet.is_empty() && hit.snippet != hit.title {
            entry.push_str("\n   ");
            entry.push_str(&hit.snippet);
        }
        if !hit.url.is_empty() {
            entry.push_str("\n   ");
            entry.push_str(&hit.url);
        }
        entry
    });

    format!(
        "Search results for '{query}':\n\n{}",
        lines.collect::<Vec<_>>().join("\n")
    )
}

#[async_trait]
impl ToolHandler for WebSearchTool {
    async fn call(&self, args: &ToolArgs) -> Result<ToolOutput> {
        let query = required_str(args, "query")?;
        let results = self.search(query, RESULT_LIMIT).await?;
        Ok(ToolOutput::Text(format_results(query, &results)))
    }
}
