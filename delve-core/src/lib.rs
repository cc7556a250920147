//! # Delve Core
//!
//! Core library for the Delve research assistant.
//! Provides the iterative research engine, the completion provider interface
//! (brain), web search providers, configuration, and fundamental types.

pub mod brain;
pub mod config;
pub mod error;
pub mod providers;
pub mod research;
pub mod search;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{LlmProvider, MockLlmProvider};
pub use config::{DelveConfig, LlmConfig, ResearchOptions, SearchConfig, SearchDepth};
pub use error::{ConfigError, DelveError, LlmError, ResearchError, ResearchStep, Result, SearchError};
pub use providers::{OpenAiCompatibleProvider, create_provider};
pub use research::{
    ProgressEvent, ProgressKind, ProgressReporter, ResearchEngine, ResearchResult, RoutingDecision,
};
pub use search::{MockSearchProvider, SearchProvider, SearchResponse, SourceItem, TavilySearchProvider};
pub use types::{CompletionRequest, CompletionResponse, FinishReason, Message, Role, TokenUsage};
