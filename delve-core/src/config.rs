//! Configuration system for Delve.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from the user config directory and/or `.delve/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelveConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub research: ResearchOptions,
}

impl DelveConfig {
    /// Collect warnings from every section.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for w in self.llm.validate() {
            warnings.push(format!("[llm] {}", w));
        }
        for w in self.search.validate() {
            warnings.push(format!("[search] {}", w));
        }
        for w in self.research.validate() {
            warnings.push(format!("[research] {}", w));
        }
        warnings
    }

    /// Render as pretty TOML, as written by `delve config init`.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }
}

/// Completion provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Model identifier (e.g., "gpt-4o-mini", "qwen2.5:14b").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Inline API key. Takes precedence over `api_key_env`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Optional base URL override for the API endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Sampling temperature for every research completion.
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Transport-level retry policy.
    pub retry: RetryConfig,
    /// Send `json_schema` response formats. Disable for backends that reject
    /// them; structured replies are then requested by prompt alone.
    pub structured_output: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            base_url: None,
            temperature: 0.7,
            max_tokens: None,
            timeout_secs: 120,
            retry: RetryConfig::default(),
            structured_output: true,
        }
    }
}

impl LlmConfig {
    /// Validate this LLM config and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.model.trim().is_empty() {
            warnings.push("model is empty".to_string());
        }
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "temperature ({}) is outside the typical range 0.0-2.0",
                self.temperature
            ));
        }
        if self.max_tokens == Some(0) {
            warnings.push("max_tokens is 0; every completion will be truncated".to_string());
        }
        if self.timeout_secs == 0 {
            warnings.push("timeout_secs is 0; requests will fail immediately".to_string());
        }
        warnings
    }
}

/// Exponential backoff policy for transient provider failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Tavily search depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    #[default]
    Basic,
    Advanced,
}

impl fmt::Display for SearchDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchDepth::Basic => write!(f, "basic"),
            SearchDepth::Advanced => write!(f, "advanced"),
        }
    }
}

/// Upper bound applied to `SearchConfig::timeout_secs`.
pub const MAX_SEARCH_TIMEOUT_SECS: u64 = 120;

/// Web search provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub api_key_env: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
    pub search_depth: SearchDepth,
    pub include_raw_content: bool,
    pub include_images: bool,
    /// Capped at [`MAX_SEARCH_TIMEOUT_SECS`].
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: "TAVILY_API_KEY".to_string(),
            api_key: None,
            base_url: "https://api.tavily.com".to_string(),
            search_depth: SearchDepth::Basic,
            include_raw_content: true,
            include_images: true,
            timeout_secs: 60,
        }
    }
}

impl SearchConfig {
    pub fn effective_timeout_secs(&self) -> u64 {
        self.timeout_secs.min(MAX_SEARCH_TIMEOUT_SECS)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.timeout_secs > MAX_SEARCH_TIMEOUT_SECS {
            warnings.push(format!(
                "timeout_secs ({}) exceeds {}; the cap will be used",
                self.timeout_secs, MAX_SEARCH_TIMEOUT_SECS
            ));
        }
        if url::Url::parse(&self.base_url).is_err() {
            warnings.push(format!("base_url '{}' is not a valid URL", self.base_url));
        }
        if !self.include_raw_content {
            warnings.push(
                "include_raw_content is false; summaries will only see short snippets"
                    .to_string(),
            );
        }
        warnings
    }
}

/// Tuning knobs for a single research session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchOptions {
    /// Main-loop iterations. Zero or negative skips the loop entirely.
    pub max_research_loops: i32,
    /// Raw content budget per source, in characters.
    pub max_characters_per_source: usize,
    pub max_source_count_per_search: usize,
    /// Empty-result retries allowed before moving on.
    pub max_search_retry_attempts: u32,
    /// Synthesize all gathered summaries into the final report.
    pub enable_summary_consolidation: bool,
}

impl Default for ResearchOptions {
    fn default() -> Self {
        Self {
            max_research_loops: 3,
            max_characters_per_source: 4000,
            max_source_count_per_search: 5,
            max_search_retry_attempts: 2,
            enable_summary_consolidation: false,
        }
    }
}

impl ResearchOptions {
    /// Number of main-loop passes the engine will run.
    pub fn loop_budget(&self) -> u32 {
        self.max_research_loops.max(0) as u32
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.max_research_loops <= 0 {
            warnings.push(format!(
                "max_research_loops is {}; only the initial query will be generated",
                self.max_research_loops
            ));
        }
        if self.max_source_count_per_search == 0 {
            warnings.push("max_source_count_per_search is 0".to_string());
        }
        if self.max_characters_per_source == 0 {
            warnings.push(
                "max_characters_per_source is 0; raw content will be omitted".to_string(),
            );
        }
        warnings
    }
}

/// Resolve a secret: a non-blank inline value wins, then the non-blank
/// value of the environment variable `env_var`.
pub fn resolve_secret(inline: Option<String>, env_var: &str) -> Option<String> {
    inline
        .filter(|k| !k.trim().is_empty())
        .or_else(|| std::env::var(env_var).ok())
        .filter(|k| !k.trim().is_empty())
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "delve", "delve")
}

/// Load configuration by merging layers in priority order (highest first):
///
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `DELVE_`)
/// 3. Workspace-local config (`.delve/config.toml`)
/// 4. User config (`~/.config/delve/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&DelveConfig>,
) -> Result<DelveConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(DelveConfig::default()));

    if let Some(dirs) = project_dirs() {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".delve").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // DELVE_LLM__MODEL, DELVE_RESEARCH__MAX_RESEARCH_LOOPS, ...
    figment = figment.merge(Env::prefixed("DELVE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    Ok(figment.extract()?)
}

/// Check whether any Delve configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(dirs) = project_dirs()
        && dirs.config_dir().join("config.toml").exists()
    {
        return true;
    }
    workspace.is_some_and(|ws| ws.join(".delve").join("config.toml").exists())
}
