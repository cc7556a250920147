//! Web search abstraction.
//!
//! The engine consumes search through [`SearchProvider`]. The Tavily client
//! lives in [`tavily`]; [`MockSearchProvider`] scripts results for tests.

pub mod tavily;

use crate::error::SearchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

pub use tavily::TavilySearchProvider;

/// A single search hit. The URL is the identity used for deduplication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceItem {
    pub title: String,
    pub url: String,
    pub content: String,
    pub raw_content: String,
}

impl SourceItem {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        content: impl Into<String>,
        raw_content: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            content: content.into(),
            raw_content: raw_content.into(),
        }
    }
}

/// The outcome of one search call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchResponse {
    pub items: Vec<SourceItem>,
    pub images: Vec<String>,
}

impl SearchResponse {
    pub fn new(items: Vec<SourceItem>, images: Vec<String>) -> Self {
        Self { items, images }
    }

    /// No items. Images alone do not count as a result.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Trait for web search backends.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run `query`, returning at most `max_results` items.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse, SearchError>;
}

/// A scripted search provider for testing.
///
/// Serves queued outcomes in order, then repeats the fallback response
/// (empty unless set with [`MockSearchProvider::always`]).
#[derive(Default)]
pub struct MockSearchProvider {
    queue: Mutex<Vec<Result<SearchResponse, SearchError>>>,
    fallback: SearchResponse,
    queries: Mutex<Vec<(String, usize)>>,
}

impl MockSearchProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every unqueued call with `response`.
    pub fn always(response: SearchResponse) -> Self {
        Self {
            fallback: response,
            ..Self::default()
        }
    }

    pub fn queue_response(&self, response: SearchResponse) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Ok(response));
    }

    pub fn queue_empty(&self) {
        self.queue_response(SearchResponse::default());
    }

    pub fn queue_error(&self, error: SearchError) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Err(error));
    }

    /// Every `(query, max_results)` pair received so far.
    pub fn queries(&self) -> Vec<(String, usize)> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse, SearchError> {
        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((query.to_string(), max_results));

        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.is_empty() {
            Ok(self.fallback.clone())
        } else {
            queue.remove(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_item_missing_fields_default() {
        let item: SourceItem = serde_json::from_str(r#"{"url":"https://a"}"#).unwrap();
        assert_eq!(item.url, "https://a");
        assert_eq!(item.title, "");
        assert_eq!(item.raw_content, "");
    }

    #[test]
    fn test_search_response_images_only_is_empty() {
        let response = SearchResponse::new(vec![], vec!["https://img".into()]);
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn test_mock_search_queue_then_fallback() {
        let hit = SearchResponse::new(
            vec![SourceItem::new("A", "https://a", "c", "r")],
            vec![],
        );
        let mock = MockSearchProvider::always(hit.clone());
        mock.queue_empty();
        mock.queue_error(SearchError::Timeout { timeout_secs: 3 });
        let cancel = CancellationToken::new();

        assert!(mock.search("q1", 5, &cancel).await.unwrap().is_empty());
        assert!(mock.search("q2", 5, &cancel).await.is_err());
        assert_eq!(mock.search("q3", 2, &cancel).await.unwrap(), hit);
        assert_eq!(
            mock.queries(),
            vec![
                ("q1".to_string(), 5),
                ("q2".to_string(), 5),
                ("q3".to_string(), 2)
            ]
        );
    }

    #[tokio::test]
    async fn test_mock_search_cancelled() {
        let mock = MockSearchProvider::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = mock.search("q", 5, &cancel).await;
        assert!(matches!(result, Err(SearchError::Cancelled)));
        assert_eq!(mock.call_count(), 0);
    }
}
