//! Research session state.

use super::dialogue::Dialogue;
use crate::search::SourceItem;
use crate::types::TokenUsage;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;
use uuid::Uuid;

/// Current phase of a research session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPhase {
    /// Writing the first search query from the topic.
    GeneratingInitialQuery,
    /// Running a web search.
    WebResearching,
    /// The last search was empty; producing a replacement query.
    RetryingSearch,
    /// Folding the newest results into the running summary.
    Summarizing,
    /// Looking for a knowledge gap and the next query.
    Reflecting,
    /// Loop budget spent; preparing the final report.
    Finalizing,
    /// Research complete.
    Complete,
}

impl fmt::Display for ResearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResearchPhase::GeneratingInitialQuery => "generating_initial_query",
            ResearchPhase::WebResearching => "web_researching",
            ResearchPhase::RetryingSearch => "retrying_search",
            ResearchPhase::Summarizing => "summarizing",
            ResearchPhase::Reflecting => "reflecting",
            ResearchPhase::Finalizing => "finalizing",
            ResearchPhase::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// The mutable record threaded through every step of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchState {
    /// Unique session ID, used for log correlation.
    pub id: Uuid,
    pub topic: String,
    pub search_query: String,
    pub query_rationale: String,
    pub running_summary: String,
    pub knowledge_gap: String,
    /// Completed main-loop iterations.
    pub loop_count: u32,
    /// Consecutive empty searches since the last non-empty one.
    pub search_retry_count: u32,
    /// Deduplicated by URL across the whole session.
    pub sources_gathered: Vec<SourceItem>,
    /// One formatted source block per search that reached the summarizer.
    pub web_research_results: Vec<String>,
    pub summaries_gathered: Vec<String>,
    pub images: Vec<String>,
    pub query_dialogue: Dialogue,
    pub reflection_dialogue: Dialogue,
    pub phase: ResearchPhase,
    /// Token usage summed over every completion in the session.
    pub usage: TokenUsage,
}

impl ResearchState {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            search_query: String::new(),
            query_rationale: String::new(),
            running_summary: String::new(),
            knowledge_gap: String::new(),
            loop_count: 0,
            search_retry_count: 0,
            sources_gathered: Vec::new(),
            web_research_results: Vec::new(),
            summaries_gathered: Vec::new(),
            images: Vec::new(),
            query_dialogue: Dialogue::new(),
            reflection_dialogue: Dialogue::new(),
            phase: ResearchPhase::GeneratingInitialQuery,
            usage: TokenUsage::default(),
        }
    }

    /// Transition to a new phase.
    pub fn transition(&mut self, new_phase: ResearchPhase) {
        if self.phase == new_phase {
            return;
        }
        info!(
            session = %self.id,
            from = %self.phase,
            to = %new_phase,
            loops = self.loop_count,
            "Research phase transition"
        );
        self.phase = new_phase;
    }

    /// The most recent formatted source block, or empty before any search.
    pub fn latest_results(&self) -> &str {
        self.web_research_results
            .last()
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Snapshot the public result without consuming the state.
    pub fn result(&self) -> ResearchResult {
        ResearchResult {
            topic: self.topic.clone(),
            summary: self.running_summary.clone(),
            sources: self.sources_gathered.clone(),
            images: self.images.clone(),
        }
    }

    pub fn into_result(self) -> ResearchResult {
        ResearchResult {
            topic: self.topic,
            summary: self.running_summary,
            sources: self.sources_gathered,
            images: self.images,
        }
    }
}

/// The public outcome of a completed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchResult {
    pub topic: String,
    pub summary: String,
    pub sources: Vec<SourceItem>,
    pub images: Vec<String>,
}
