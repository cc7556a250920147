//! Error types for the Delve research core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the completion provider, the search provider, the research
//! engine, and configuration.

use std::fmt;

/// Top-level error type for the Delve core library.
#[derive(Debug, thiserror::Error)]
pub enum DelveError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Research error: {0}")]
    Research(#[from] ResearchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from completion provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Completion request was cancelled")]
    Cancelled,
}

/// Errors from web search providers.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("No search API key provided; set {env_var} or configure search.api_key")]
    MissingApiKey { env_var: String },

    #[error("Invalid search API key: {message}")]
    InvalidApiKey { message: String },

    #[error("Search access forbidden: {message}")]
    Forbidden { message: String },

    #[error("Bad search request: {message}")]
    BadRequest { message: String },

    #[error("Search usage limit exceeded: {message}")]
    UsageLimitExceeded { message: String },

    #[error("Search request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Search request failed: {message}")]
    Http { message: String },

    #[error("Search response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Search request was cancelled")]
    Cancelled,
}

/// The engine step an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResearchStep {
    QueryGeneration,
    WebResearch,
    Summarize,
    Reflection,
    Finalize,
}

impl fmt::Display for ResearchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResearchStep::QueryGeneration => write!(f, "query generation"),
            ResearchStep::WebResearch => write!(f, "web research"),
            ResearchStep::Summarize => write!(f, "summarization"),
            ResearchStep::Reflection => write!(f, "reflection"),
            ResearchStep::Finalize => write!(f, "finalization"),
        }
    }
}

/// Errors that abort (or, for consolidation, degrade) a research session.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("Completion failed during {step}: {source}")]
    Completion {
        step: ResearchStep,
        #[source]
        source: LlmError,
    },

    #[error("Completion during {step} finished abnormally: {reason}")]
    AbnormalFinish { step: ResearchStep, reason: String },

    #[error("Malformed structured response during {step}: {message}")]
    MalformedResponse { step: ResearchStep, message: String },

    #[error("Web search failed: {source}")]
    Search {
        #[source]
        source: SearchError,
    },

    #[error("No summaries were gathered to consolidate")]
    NothingToConsolidate,

    #[error("Research session was cancelled")]
    Cancelled,
}

impl ResearchError {
    /// Wrap a completion provider error, folding cancellation into `Cancelled`.
    pub fn completion(step: ResearchStep, source: LlmError) -> Self {
        match source {
            LlmError::Cancelled => ResearchError::Cancelled,
            source => ResearchError::Completion { step, source },
        }
    }

    /// Wrap a search provider error, folding cancellation into `Cancelled`.
    pub fn search(source: SearchError) -> Self {
        match source {
            SearchError::Cancelled => ResearchError::Cancelled,
            source => ResearchError::Search { source },
        }
    }

    /// The step that produced this error, if it is tied to one.
    pub fn step(&self) -> Option<ResearchStep> {
        match self {
            ResearchError::Completion { step, .. }
            | ResearchError::AbnormalFinish { step, .. }
            | ResearchError::MalformedResponse { step, .. } => Some(*step),
            ResearchError::Search { .. } => Some(ResearchStep::WebResearch),
            ResearchError::NothingToConsolidate => Some(ResearchStep::Finalize),
            ResearchError::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResearchError::Cancelled)
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::ParseError {
            message: err.to_string(),
        }
    }
}

/// A type alias for results using the top-level `DelveError`.
pub type Result<T> = std::result::Result<T, DelveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_llm() {
        let err = DelveError::Llm(LlmError::ApiRequest {
            message: "connection refused".into(),
        });
        assert_eq!(
            err.to_string(),
            "LLM error: API request failed: connection refused"
        );
    }

    #[test]
    fn test_error_display_research_abnormal_finish() {
        let err = DelveError::Research(ResearchError::AbnormalFinish {
            step: ResearchStep::QueryGeneration,
            reason: "length".into(),
        });
        assert_eq!(
            err.to_string(),
            "Research error: Completion during query generation finished abnormally: length"
        );
    }

    #[test]
    fn test_error_display_search() {
        let err = SearchError::UsageLimitExceeded {
            message: "monthly quota".into(),
        };
        assert_eq!(
            err.to_string(),
            "Search usage limit exceeded: monthly quota"
        );
    }

    #[test]
    fn test_error_display_config() {
        let err = DelveError::Config(ConfigError::ParseError {
            message: "invalid type for llm.model".into(),
        });
        assert_eq!(
            err.to_string(),
            "Configuration error: Configuration parse error: invalid type for llm.model"
        );
    }

    #[test]
    fn test_completion_cancellation_folds() {
        let err = ResearchError::completion(ResearchStep::Reflection, LlmError::Cancelled);
        assert!(err.is_cancelled());
        assert_eq!(err.step(), None);
    }

    #[test]
    fn test_search_cancellation_folds() {
        let err = ResearchError::search(SearchError::Cancelled);
        assert!(err.is_cancelled());

        let err = ResearchError::search(SearchError::Timeout { timeout_secs: 60 });
        assert!(matches!(err, ResearchError::Search { .. }));
        assert_eq!(err.step(), Some(ResearchStep::WebResearch));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DelveError = io_err.into();
        assert!(matches!(err, DelveError::Io(_)));
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: DelveError = serde_err.into();
        assert!(matches!(err, DelveError::Serialization(_)));
    }
}
