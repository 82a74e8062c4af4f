//! Tavily web search client — the external search capability the
//! research and base-rate analyst roles draw on.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

const TAVILY_URL: &str = "https://api.tavily.com/search";
const MAX_RESULTS: u32 = 5;
const SNIPPET_CHARS: usize = 400;

#[derive(Debug, Serialize)]
struct SearchRequest {
    api_key: String,
    query: String,
    max_results: u32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

pub struct TavilyClient {
    http: Client,
    api_key: String,
}

impl TavilyClient {
    pub fn new(api_key: String) -> Result<Self, EngineError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(EngineError::Http)?;
        Ok(Self { http, api_key })
    }

    /// Search the web and return a formatted block of title/url/snippet
    /// entries, matching the shape the analyst prompts expect.
    pub async fn search(&self, query: &str) -> Result<String, EngineError> {
        let request = SearchRequest {
            api_key: self.api_key.clone(),
            query: query.to_string(),
            max_results: MAX_RESULTS,
        };

        let response: SearchResponse = self
            .http
            .post(TAVILY_URL)
            .json(&request)
            .send()
            .await
            .map_err(EngineError::Http)?
            .json()
            .await
            .map_err(EngineError::Http)?;

        if response.results.is_empty() {
            return Ok("No results found.".to_string());
        }

        let mut lines = Vec::with_capacity(response.results.len() * 3);
        for r in response.results {
            lines.push(format!("[{}]({})", r.title, r.url));
            let snippet: String = r.content.chars().take(SNIPPET_CHARS).collect();
            lines.push(snippet);
            lines.push(String::new());
        }

        Ok(lines.join("\n"))
    }
}
