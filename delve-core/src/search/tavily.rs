//! Tavily web search client.

use super::{SearchProvider, SearchResponse, SourceItem};
use crate::config::{SearchConfig, resolve_secret};
use crate::error::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const CLIENT_SOURCE: &str = "delve";

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    raw_content: Option<String>,
}

/// Images come back as bare URLs, or as objects when descriptions are requested.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TavilyImage {
    Url(String),
    Described { url: String },
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
    #[serde(default)]
    images: Vec<TavilyImage>,
}

/// Search provider backed by the Tavily `/search` endpoint.
pub struct TavilySearchProvider {
    client: Client,
    endpoint: String,
    api_key: String,
    config: SearchConfig,
}

impl TavilySearchProvider {
    /// Create a provider, reading the key from `config.api_key` or the
    /// environment variable named by `config.api_key_env`.
    pub fn new(config: &SearchConfig) -> Result<Self, SearchError> {
        let api_key = resolve_secret(config.api_key.clone(), &config.api_key_env)
            .ok_or_else(|| SearchError::MissingApiKey {
                env_var: config.api_key_env.clone(),
            })?;
        Self::new_with_key(config, api_key)
    }

    pub fn new_with_key(config: &SearchConfig, api_key: String) -> Result<Self, SearchError> {
        let base = url::Url::parse(&config.base_url).map_err(|e| SearchError::Http {
            message: format!("Invalid base URL '{}': {}", config.base_url, e),
        })?;
        let endpoint = format!("{}/search", base.as_str().trim_end_matches('/'));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.effective_timeout_secs()))
            .build()
            .map_err(|e| SearchError::Http {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            config: config.clone(),
        })
    }

    fn build_body(&self, query: &str, max_results: usize) -> Value {
        json!({
            "query": query,
            "max_results": max_results,
            "search_depth": self.config.search_depth.to_string(),
            "include_raw_content": self.config.include_raw_content,
            "include_images": self.config.include_images,
        })
    }

    fn parse_response(body: &str) -> Result<SearchResponse, SearchError> {
        let parsed: TavilyResponse =
            serde_json::from_str(body).map_err(|e| SearchError::ResponseParse {
                message: format!("Invalid JSON: {}", e),
            })?;

        let items = parsed
            .results
            .into_iter()
            .map(|r| {
                let raw_content = r
                    .raw_content
                    .filter(|raw| !raw.is_empty())
                    .unwrap_or_else(|| r.content.clone());
                SourceItem {
                    title: r.title,
                    url: r.url,
                    content: r.content,
                    raw_content,
                }
            })
            .collect();
        let images = parsed
            .images
            .into_iter()
            .map(|image| match image {
                TavilyImage::Url(url) | TavilyImage::Described { url } => url,
            })
            .collect();

        Ok(SearchResponse { items, images })
    }

    /// Pull the `detail` message out of an error body: either a string or `{"error": ...}`.
    fn extract_detail(body: &str) -> Option<String> {
        let value: Value = serde_json::from_str(body).ok()?;
        let detail = value.get("detail")?;
        detail
            .as_str()
            .or_else(|| detail.get("error").and_then(|e| e.as_str()))
            .map(str::to_string)
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> SearchError {
        let detail = Self::extract_detail(body);
        match status.as_u16() {
            401 => SearchError::InvalidApiKey {
                message: detail.unwrap_or_else(|| "Invalid API key".to_string()),
            },
            403 => SearchError::Forbidden {
                message: detail.unwrap_or_else(|| "Access forbidden".to_string()),
            },
            400 => SearchError::BadRequest {
                message: detail.unwrap_or_else(|| "Bad request".to_string()),
            },
            429 => SearchError::UsageLimitExceeded {
                message: detail.unwrap_or_else(|| "Usage limit exceeded".to_string()),
            },
            _ => SearchError::Http {
                message: format!(
                    "Request failed with status {}: {}",
                    status,
                    detail.as_deref().unwrap_or(body)
                ),
            },
        }
    }

    fn map_transport_error(&self, err: reqwest::Error) -> SearchError {
        if err.is_timeout() {
            SearchError::Timeout {
                timeout_secs: self.config.effective_timeout_secs(),
            }
        } else {
            SearchError::Http {
                message: format!("Request failed: {}", err),
            }
        }
    }

    async fn send(&self, body: &Value) -> Result<SearchResponse, SearchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("X-Client-Source", CLIENT_SOURCE)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &text));
        }
        Self::parse_response(&text)
    }
}

#[async_trait]
impl SearchProvider for TavilySearchProvider {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse, SearchError> {
        let body = self.build_body(query, max_results);
        debug!(endpoint = %self.endpoint, query = %query, max_results, "Sending Tavily search");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SearchError::Cancelled),
            result = self.send(&body) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchDepth;

    fn provider() -> TavilySearchProvider {
        let config = SearchConfig {
            api_key: Some("tvly-test".into()),
            ..Default::default()
        };
        TavilySearchProvider::new(&config).unwrap()
    }

    #[test]
    fn test_missing_key() {
        let config = SearchConfig {
            api_key_env: "DELVE_TEST_NONEXISTENT_TAVILY".into(),
            ..Default::default()
        };
        match TavilySearchProvider::new(&config) {
            Err(SearchError::MissingApiKey { env_var }) => {
                assert_eq!(env_var, "DELVE_TEST_NONEXISTENT_TAVILY")
            }
            Err(other) => panic!("Expected MissingApiKey, got {:?}", other),
            Ok(_) => panic!("Expected MissingApiKey, got a provider"),
        }
    }

    #[test]
    fn test_blank_inline_key_is_missing() {
        let config = SearchConfig {
            api_key: Some("   ".into()),
            api_key_env: "DELVE_TEST_NONEXISTENT_TAVILY".into(),
            ..Default::default()
        };
        assert!(matches!(
            TavilySearchProvider::new(&config),
            Err(SearchError::MissingApiKey { .. })
        ));
    }

    #[test]
    fn test_endpoint_from_base_url() {
        assert_eq!(provider().endpoint, "https://api.tavily.com/search");
    }

    #[test]
    fn test_build_body() {
        let mut p = provider();
        p.config.search_depth = SearchDepth::Advanced;
        let body = p.build_body("rust async", 3);
        assert_eq!(body["query"], "rust async");
        assert_eq!(body["max_results"], 3);
        assert_eq!(body["search_depth"], "advanced");
        assert_eq!(body["include_raw_content"], true);
        assert_eq!(body["include_images"], true);
    }

    #[test]
    fn test_parse_response_raw_content_fallback() {
        let body = r#"{
            "query": "q",
            "results": [
                {"title": "A", "url": "https://a", "content": "short a", "raw_content": "long a", "score": 0.9},
                {"title": "B", "url": "https://b", "content": "short b", "raw_content": null},
                {"url": "https://c", "content": "short c"}
            ],
            "images": ["https://img/1", {"url": "https://img/2", "description": "d"}],
            "response_time": 1.2
        }"#;
        let response = TavilySearchProvider::parse_response(body).unwrap();
        assert_eq!(response.items.len(), 3);
        assert_eq!(response.items[0].raw_content, "long a");
        assert_eq!(response.items[1].raw_content, "short b");
        assert_eq!(response.items[2].title, "");
        assert_eq!(response.images, vec!["https://img/1", "https://img/2"]);
    }

    #[test]
    fn test_parse_response_invalid_json() {
        let result = TavilySearchProvider::parse_response("<html>");
        assert!(matches!(result, Err(SearchError::ResponseParse { .. })));
    }

    #[test]
    fn test_map_http_error_variants() {
        use reqwest::StatusCode;
        let err = TavilySearchProvider::map_http_error(
            StatusCode::UNAUTHORIZED,
            r#"{"detail": {"error": "Unauthorized: missing or invalid API key."}}"#,
        );
        match err {
            SearchError::InvalidApiKey { message } => assert!(message.contains("invalid API key")),
            other => panic!("Expected InvalidApiKey, got {:?}", other),
        }

        let err = TavilySearchProvider::map_http_error(StatusCode::FORBIDDEN, "");
        assert!(matches!(err, SearchError::Forbidden { ref message } if message == "Access forbidden"));

        let err =
            TavilySearchProvider::map_http_error(StatusCode::BAD_REQUEST, r#"{"detail": "query is required"}"#);
        assert!(matches!(err, SearchError::BadRequest { ref message } if message == "query is required"));

        let err = TavilySearchProvider::map_http_error(StatusCode::TOO_MANY_REQUESTS, "{}");
        assert!(matches!(err, SearchError::UsageLimitExceeded { .. }));

        let err = TavilySearchProvider::map_http_error(StatusCode::BAD_GATEWAY, "upstream down");
        match err {
            SearchError::Http { message } => assert!(message.contains("upstream down")),
            other => panic!("Expected Http, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_search_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = provider().search("q", 5, &cancel).await;
        assert!(matches!(result, Err(SearchError::Cancelled)));
    }
}
