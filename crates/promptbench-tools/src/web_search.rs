//! `search_web` -- web search with automatic engine fallback.
//!
//! Search priority:
//!   1. Brave Search API (when an API key is configured), honouring the
//!      `time_hint` filter through Brave's `freshness` parameter
//!   2. DuckDuckGo HTML results (no key needed)
//!
//! Both backends produce the same payload:
//! `{"query", "num_results", "results": [{title, snippet, url, source}], "provider"}`.
//! Backend failures are reported as an `error` payload rather than a tool
//! error so the model still sees which query failed.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use promptbench_agent::tools::{ToolCategory, ToolError, ToolHandler, ToolMetadata, ToolVisibility};
use promptbench_agent::ToolSchema;

// ═══════════════════════════════════════════════════════════════════════
//  Constants
// ═══════════════════════════════════════════════════════════════════════

/// Results returned when the model does not ask for a count.
const DEFAULT_NUM_RESULTS: i64 = 3;

/// Upper bound on results per call.
const MAX_NUM_RESULTS: i64 = 5;

/// DuckDuckGo HTML search endpoint.
const DUCKDUCKGO_HTML_URL: &str = "https://html.duckduckgo.com/html/";

/// Brave Search API endpoint.
const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";

/// Realistic browser User-Agent to avoid being blocked.
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

// ═══════════════════════════════════════════════════════════════════════
//  Errors
// ═══════════════════════════════════════════════════════════════════════

/// Failure of one search backend.
#[derive(Debug, thiserror::Error)]
enum BackendError {
    #[error("{engine} request failed: {source}")]
    Request {
        engine: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{engine} returned status {status}")]
    Status { engine: &'static str, status: u16 },
}

// ═══════════════════════════════════════════════════════════════════════
//  Arguments
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct SearchArgs {
    #[serde(default)]
    query: String,
    num_results: Option<i64>,
    time_hint: Option<String>,
    // Neither backend filters on exact dates; logged only.
    after: Option<String>,
    before: Option<String>,
}

/// Brave `freshness` code for a time hint.
fn freshness(time_hint: &str) -> Option<&'static str> {
    match time_hint.trim().to_lowercase().as_str() {
        "day" => Some("pd"),
        "week" => Some("pw"),
        "month" => Some("pm"),
        "year" => Some("py"),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tool
// ═══════════════════════════════════════════════════════════════════════

/// Web search tool with multi-engine support.
pub struct WebSearch {
    client: reqwest::Client,
    /// Brave Search API key (if available).
    brave_api_key: Option<String>,
    brave_url: String,
    duckduckgo_url: String,
}

impl WebSearch {
    /// Create the tool.  `timeout` bounds each backend request.
    pub fn new(brave_api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            brave_api_key: brave_api_key.filter(|k| !k.trim().is_empty()),
            brave_url: BRAVE_SEARCH_URL.to_owned(),
            duckduckgo_url: DUCKDUCKGO_HTML_URL.to_owned(),
        }
    }

    /// Point both backends somewhere else.
    pub fn with_endpoints(mut self, brave: impl Into<String>, duckduckgo: impl Into<String>) -> Self {
        self.brave_url = brave.into();
        self.duckduckgo_url = duckduckgo.into();
        self
    }

    /// Run a search, trying Brave first then falling back to DuckDuckGo.
    async fn search(&self, args: SearchArgs) -> Value {
        let query = args.query.trim();
        if query.is_empty() {
            return json!({ "error": "Query cannot be empty" });
        }
        let count = args
            .num_results
            .unwrap_or(DEFAULT_NUM_RESULTS)
            .clamp(1, MAX_NUM_RESULTS) as usize;

        debug!(
            query,
            count,
            time_hint = ?args.time_hint,
            after = ?args.after,
            before = ?args.before,
            "performing web search"
        );

        if let Some(ref api_key) = self.brave_api_key {
            let fresh = args.time_hint.as_deref().and_then(freshness);
            match self.search_brave(query, count, fresh, api_key).await {
                Ok(results) if !results.is_empty() => {
                    debug!(count = results.len(), engine = "brave", "search completed");
                    return payload(query, results, "brave");
                }
                Ok(_) => debug!("Brave returned no results, falling back to DuckDuckGo"),
                Err(e) => warn!(error = %e, "Brave Search failed, falling back"),
            }
        }

        match self.search_duckduckgo(query, count).await {
            Ok(mut results) => {
                if results.is_empty() {
                    results.push(no_results_placeholder(query));
                }
                debug!(count = results.len(), engine = "duckduckgo", "search completed");
                payload(query, results, "duckduckgo")
            }
            Err(e) => {
                warn!(error = %e, "all search engines failed");
                json!({ "error": format!("Search failed: {e}"), "query": query })
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────
    //  Brave Search API
    // ───────────────────────────────────────────────────────────────────

    async fn search_brave(
        &self,
        query: &str,
        count: usize,
        freshness: Option<&str>,
        api_key: &str,
    ) -> Result<Vec<Value>, BackendError> {
        let count_param = count.to_string();
        let mut params = vec![("q", query), ("count", count_param.as_str())];
        if let Some(fresh) = freshness {
            params.push(("freshness", fresh));
        }

        let response = self
            .client
            .get(&self.brave_url)
            .header("X-Subscription-Token", api_key)
            .header("Accept", "application/json")
            .query(&params)
            .send()
            .await
            .map_err(|source| BackendError::Request {
                engine: "Brave Search",
                source,
            })?;

        if !response.status().is_success() {
            return Err(BackendError::Status {
                engine: "Brave Search",
                status: response.status().as_u16(),
            });
        }

        let body: Value = response.json().await.map_err(|source| BackendError::Request {
            engine: "Brave Search",
            source,
        })?;
        Ok(parse_brave_results(&body, count))
    }

    // ───────────────────────────────────────────────────────────────────
    //  DuckDuckGo HTML
    // ───────────────────────────────────────────────────────────────────

    async fn search_duckduckgo(&self, query: &str, count: usize) -> Result<Vec<Value>, BackendError> {
        // POST with form data is more reliable than GET for DDG.
        let response = self
            .client
            .post(&self.duckduckgo_url)
            .form(&[("q", query), ("kl", ""), ("df", "")])
            .send()
            .await
            .map_err(|source| BackendError::Request {
                engine: "DuckDuckGo",
                source,
            })?;

        if !response.status().is_success() {
            return Err(BackendError::Status {
                engine: "DuckDuckGo",
                status: response.status().as_u16(),
            });
        }

        let html = response.text().await.map_err(|source| BackendError::Request {
            engine: "DuckDuckGo",
            source,
        })?;
        Ok(parse_duckduckgo_results(&html, count))
    }
}

#[async_trait]
impl ToolHandler for WebSearch {
    fn name(&self) -> &str {
        "search_web"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::function(
            "search_web",
            "Search the web for current information. Returns top search results with titles, \
             snippets, and URLs.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query to look up"
                    },
                    "num_results": {
                        "type": "integer",
                        "description": "Number of results to return (1-5)",
                        "default": DEFAULT_NUM_RESULTS
                    },
                    "time_hint": {
                        "type": "string",
                        "enum": ["day", "week", "month", "year"],
                        "description": "Restrict results to a recent time window"
                    },
                    "after": {
                        "type": "string",
                        "description": "Earliest publication date (YYYY-MM-DD)"
                    },
                    "before": {
                        "type": "string",
                        "description": "Latest publication date (YYYY-MM-DD)"
                    }
                },
                "required": ["query"]
            }),
        )
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(ToolCategory::Search, ToolVisibility::Primary)
    }

    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let args: SearchArgs = serde_json::from_value(Value::Object(args))
            .map_err(|e| ToolError::invalid(format!("Invalid arguments for 'search_web': {e}")))?;
        Ok(self.search(args).await)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Result shaping
// ═══════════════════════════════════════════════════════════════════════

fn payload(query: &str, results: Vec<Value>, provider: &str) -> Value {
    json!({
        "query": query,
        "num_results": results.len(),
        "results": results,
        "provider": provider,
    })
}

fn result_entry(title: &str, snippet: &str, url: &str, fallback_source: &str) -> Value {
    let title = if title.is_empty() { url } else { title };
    json!({
        "title": title,
        "snippet": snippet,
        "url": url,
        "source": host_of(url).unwrap_or_else(|| fallback_source.to_owned()),
    })
}

fn no_results_placeholder(query: &str) -> Value {
    let url = url::Url::parse_with_params("https://duckduckgo.com/", &[("q", query)])
        .map(String::from)
        .unwrap_or_else(|_| "https://duckduckgo.com/".to_owned());
    json!({
        "title": "No results found",
        "snippet": format!("DuckDuckGo did not return results for '{query}'."),
        "url": url,
        "source": "DuckDuckGo",
    })
}

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url).ok()?.host_str().map(str::to_owned)
}

fn parse_brave_results(body: &Value, count: usize) -> Vec<Value> {
    let Some(items) = body.pointer("/web/results").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let text = |key: &str| item.get(key).and_then(Value::as_str).unwrap_or("");
            let url = text("url");
            let title = strip_html_tags(text("title"));
            let snippet = match text("snippet") {
                "" => text("description"),
                s => s,
            };
            if title.is_empty() && url.is_empty() {
                return None;
            }
            Some(result_entry(&title, &strip_html_tags(snippet), url, "Brave"))
        })
        .take(count)
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════
//  DuckDuckGo HTML parsing
// ═══════════════════════════════════════════════════════════════════════

fn parse_duckduckgo_results(html: &str, count: usize) -> Vec<Value> {
    let title_marker = "class=\"result__a\"";
    let snippet_marker = "class=\"result__snippet\"";

    let title_positions: Vec<usize> = html.match_indices(title_marker).map(|(i, _)| i).collect();
    let snippet_positions: Vec<usize> =
        html.match_indices(snippet_marker).map(|(i, _)| i).collect();

    let mut results = Vec::new();
    for (i, &title_pos) in title_positions.iter().enumerate() {
        if results.len() >= count {
            break;
        }

        let url = extract_href_before(&html[..title_pos])
            .map(|u| clean_ddg_url(&u))
            .unwrap_or_default();
        let title = strip_html_tags(&extract_tag_text(&html[title_pos + title_marker.len()..], "</a>"));

        let snippet = snippet_positions
            .get(i)
            .map(|&pos| strip_html_tags(&extract_tag_text(&html[pos + snippet_marker.len()..], "</")))
            .unwrap_or_default();

        if !title.is_empty() || !url.is_empty() {
            results.push(result_entry(title.trim(), snippet.trim(), &url, "DuckDuckGo"));
        }
    }
    results
}

/// Unwrap DuckDuckGo redirect links to the destination URL.
fn clean_ddg_url(raw: &str) -> String {
    let absolute = if raw.starts_with("//") {
        format!("https:{raw}")
    } else {
        raw.to_owned()
    };
    if absolute.contains("duckduckgo.com/l/")
        && let Ok(parsed) = url::Url::parse(&absolute)
        && let Some((_, target)) = parsed.query_pairs().find(|(k, _)| k == "uddg")
    {
        return target.into_owned();
    }
    absolute
}

fn extract_href_before(html_before: &str) -> Option<String> {
    let href_marker = "href=\"";
    let start = html_before.rfind(href_marker)? + href_marker.len();
    let remaining = &html_before[start..];
    let end = remaining.find('"')?;
    Some(remaining[..end].to_owned())
}

fn extract_tag_text(html_after_marker: &str, end_marker: &str) -> String {
    let Some(open_end) = html_after_marker.find('>') else {
        return String::new();
    };
    let content = &html_after_marker[open_end + 1..];
    let end = content.find(end_marker).unwrap_or(content.len());
    content[..end].to_owned()
}

/// Strip HTML tags from a string and decode common HTML entities.
pub fn strip_html_tags(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut inside_tag = false;

    for ch in input.chars() {
        match ch {
            '<' => inside_tag = true,
            '>' => inside_tag = false,
            _ if !inside_tag => result.push(ch),
            _ => {}
        }
    }

    result
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
