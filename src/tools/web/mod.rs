//! Web tools for HTTP operations

mod search;

pub use search::{SearchProvider, SearchResult, WebSearchTool, format_results};
