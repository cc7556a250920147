//! Prompt templates and structured reply contracts for each research step.

use crate::types::ResponseSchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// User turn that opens the query dialogue.
pub const QUERY_TASK: &str = "Generate a query for web search:";

/// User turn appended to a dialogue when its last query found nothing.
pub const RETRY_TURN: &str =
    "The previous query returned no results. Please generate a different search query.";

pub const GENERATED_QUERY_SCHEMA: &str = "GeneratedQuery";
pub const REFLECTION_SCHEMA: &str = "ReflectionOutcome";

/// Structured reply of the query writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedQuery {
    #[serde(alias = "Query")]
    pub query: String,
    #[serde(alias = "Rationale", default)]
    pub rationale: String,
}

/// Structured reply of the reflection step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionOutcome {
    #[serde(alias = "KnowledgeGap", default)]
    pub knowledge_gap: String,
    #[serde(alias = "FollowUpQuery")]
    pub follow_up_query: String,
}

pub fn generated_query_schema() -> ResponseSchema {
    ResponseSchema::new(
        GENERATED_QUERY_SCHEMA,
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The actual search query string"
                },
                "rationale": {
                    "type": "string",
                    "description": "Brief explanation of why this query is relevant"
                }
            },
            "required": ["query", "rationale"],
            "additionalProperties": false
        }),
    )
}

pub fn reflection_schema() -> ResponseSchema {
    ResponseSchema::new(
        REFLECTION_SCHEMA,
        json!({
            "type": "object",
            "properties": {
                "knowledge_gap": {
                    "type": "string",
                    "description": "What information is missing or needs clarification"
                },
                "follow_up_query": {
                    "type": "string",
                    "description": "A specific, self-contained question addressing the gap"
                }
            },
            "required": ["knowledge_gap", "follow_up_query"],
            "additionalProperties": false
        }),
    )
}

/// System prompt for query generation, anchored to `date`.
pub fn query_writer_instructions(date: DateTime<Utc>, topic: &str) -> String {
    let date = date.format("%B %d, %Y");
    format!(
        r#"Your goal is to generate a targeted web search query.

<CONTEXT>
Current date: {date}
Please ensure your queries account for the most current information available as of this date.
</CONTEXT>

<TOPIC>
{topic}
</TOPIC>

<FORMAT>
Format your response as a JSON object with BOTH of these exact keys:
   - "query": The actual search query string
   - "rationale": Brief explanation of why this query is relevant
</FORMAT>

<EXAMPLE>
Example output:
{{
    "query": "machine learning transformer architecture explained",
    "rationale": "Understanding the fundamental structure of transformer models"
}}
</EXAMPLE>

Provide your response in JSON format. Do not include any tags or backticks. Only return
JSON like in the example:"#
    )
}

/// System prompt for the one-shot summarization step.
pub const SUMMARIZER_INSTRUCTIONS: &str = r#"<GOAL>
Generate a high-quality summary of the provided context.
</GOAL>

<REQUIREMENTS>
When creating a NEW summary:
1. Highlight the most relevant information related to the user topic from the search results
2. Ensure a coherent flow of information

When EXTENDING an existing summary:
1. Read the existing summary and new search results carefully.
2. Compare the new information with the existing summary.
3. For each piece of new information:
    a. If it's related to existing points, integrate it into the relevant paragraph.
    b. If it's entirely new but relevant, add a new paragraph with a smooth transition.
    c. If it's not relevant to the user topic, skip it.
4. Ensure all additions are relevant to the user's topic.
5. Verify that your final output differs from the input summary.
</REQUIREMENTS>

<FORMATTING>
- Start directly with the updated summary, without preamble or titles. Do not use XML tags in the output.
</FORMATTING>

<Task>
Think carefully about the provided Context first. Then generate a summary of the context to address the User Input.
</Task>"#;

/// User message asking for a first summary of `recent`.
pub fn create_summary_task(recent: &str, topic: &str) -> String {
    format!(
        "<Context>\n{recent}\n</Context>Create a Summary using the Context on this topic:\n<User Input>\n{topic}\n</User Input>\n\n"
    )
}

/// User message asking to fold `recent` into `summary`.
pub fn extend_summary_task(summary: &str, recent: &str, topic: &str) -> String {
    format!(
        "<Existing Summary>\n{summary}\n</Existing Summary>\n\n<New Context>\n{recent}\n</New Context>Update the Existing Summary with the New Context on this topic:\n<User Input>\n{topic}\n</User Input>\n\n"
    )
}

/// System prompt for reflection on the running summary.
pub fn reflection_instructions(topic: &str) -> String {
    format!(
        r#"You are an expert research assistant analyzing a summary about {topic}.

<GOAL>
1. Identify knowledge gaps or areas that need deeper exploration
2. Generate a follow-up question that would help expand your understanding
3. Focus on technical details, implementation specifics, or emerging trends that weren't fully covered
</GOAL>

<REQUIREMENTS>
Ensure the follow-up question is self-contained and includes necessary context for web search.
</REQUIREMENTS>

<FORMAT>
Format your response as a JSON object with these exact keys:
- knowledge_gap: Describe what information is missing or needs clarification
- follow_up_query: Write a specific question to address this gap
</FORMAT>

<Task>
Reflect carefully on the Summary to identify knowledge gaps and produce a follow-up query. Then, produce your output following this JSON format:
{{
    "knowledge_gap": "The summary lacks information about performance metrics and benchmarks",
    "follow_up_query": "What are typical performance benchmarks and metrics used to evaluate [specific technology]?"
}}
</Task>

Provide your analysis in JSON format. Do not include any tags or backticks. Only return
JSON like in the example:"#
    )
}

/// User message that opens a fresh reflection dialogue.
pub fn reflection_task(summary: &str) -> String {
    format!(
        "Reflect on our existing knowledge: \n===\n{summary},\n===\nAnd now identify a knowledge gap and generate a follow-up web search query:"
    )
}

/// System prompt for consolidating every gathered summary.
///
/// Returns `None` when there is nothing to consolidate.
pub fn finalize_instructions(summaries: &[String]) -> Option<String> {
    if summaries.is_empty() {
        return None;
    }
    let joined = summaries
        .iter()
        .map(|s| format!("<SUMMARY>{s}</SUMMARY>"))
        .collect::<Vec<_>>()
        .join("\n");
    Some(format!(
        r#"- Your task is to synthesize the piecemeal researched summaries to create a coherent final report.
- Your goal is to create a final report on the <TOPIC> submitted by the user with the information in the <SUMMARIES>.
- Do not use any knowledge other than the provided <SUMMARIES>.
- You will be provided with a list of summaries created during the research process.
- Use the provided summaries to create a comprehensive final report.
- Make sure your final report is clear and concise and captures the essence of the research conducted.
- Generate your final report in the same language used in the <TOPIC>.

<SUMMARIES>
{joined}
</SUMMARIES>"#
    ))
}

/// User message for the consolidation step.
pub fn finalize_task(topic: &str) -> String {
    format!("<TOPIC>{topic} </TOPIC>")
}
