//! Terminal rendering for progress events and the final report.

use delve_core::research::sources::format_source_list;
use delve_core::{ProgressEvent, ProgressKind, ResearchResult, RoutingDecision};

const PREVIEW_WIDTH: usize = 96;

/// Single-line preview of `text`, shortened with an ellipsis.
fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    textwrap::wrap(&flat, PREVIEW_WIDTH)
        .into_iter()
        .next()
        .map(|first| {
            if first.len() < flat.len() {
                format!("{}...", first)
            } else {
                first.into_owned()
            }
        })
        .unwrap_or_default()
}

/// One stderr line per progress event.
pub fn event_line(event: &ProgressEvent) -> String {
    let detail = match &event.kind {
        ProgressKind::QueryGeneration { query, rationale } => {
            format!("query \"{}\" ({})", query, preview(rationale))
        }
        ProgressKind::WebResearch { sources, images } => {
            format!("{} sources, {} images", sources.len(), images.len())
        }
        ProgressKind::Summarize { summary } => preview(summary),
        ProgressKind::Reflection {
            query,
            knowledge_gap,
        } => format!("gap: {} -> next query \"{}\"", preview(knowledge_gap), query),
        ProgressKind::Routing {
            decision,
            loop_count,
        } => match decision {
            RoutingDecision::Continue => format!("loop {}", loop_count + 1),
            RoutingDecision::RetrySearch => format!("no results, retry {}", loop_count + 1),
            RoutingDecision::Finalize => format!("finalizing after {} loops", loop_count),
        },
        ProgressKind::Finalize => "writing report".to_string(),
        ProgressKind::ResearchComplete { sources, .. } => {
            format!("done with {} sources", sources.len())
        }
        ProgressKind::Error { message } => format!("warning: {}", message),
    };
    format!(
        "[{}] {:<16} {}",
        event.timestamp.format("%H:%M:%S"),
        event.kind.name(),
        detail
    )
}

/// Markdown report: the summary followed by the source list.
pub fn report_markdown(result: &ResearchResult) -> String {
    let mut out = format!("# {}\n\n## Summary\n\n{}\n", result.topic, result.summary.trim());
    if !result.sources.is_empty() {
        out.push_str("\n### Sources:\n");
        out.push_str(&format_source_list(&result.sources));
        out.push('\n');
    }
    out
}
