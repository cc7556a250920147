//! Search result normalization.
//!
//! Deduplicates hits by URL, repairs mojibake in Japanese text, and renders
//! results into the block the summarizer reads.

use crate::search::SourceItem;
use regex::Regex;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::LazyLock;

/// Appended to raw content cut at the per-source character budget.
pub const TRUNCATION_MARKER: &str = "... [truncated]";

const NO_TITLE: &str = "(no title)";
const NO_URL: &str = "(no url)";

static JAPANESE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[\x{3040}-\x{309F}\x{30A0}-\x{30FF}\x{4E00}-\x{9FAF}]").ok());
static CONTROL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]").ok());
static WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s+").ok());

/// UTF-8 Japanese decoded as Latin-1, most specific first.
const MOJIBAKE: &[(&str, &str)] = &[
    ("ãã", ""),
    ("ã§", "で"),
    ("ã¯", "は"),
    ("ã»", "・"),
    ("ã¾", "ま"),
    ("ã¤", "い"),
    ("ã ", ""),
    ("ã", ""),
    ("â", ""),
    ("¿", ""),
    ("\0", ""),
    ("\r", ""),
];

pub fn contains_japanese(text: &str) -> bool {
    JAPANESE.as_ref().is_some_and(|re| re.is_match(text))
}

/// Repair garbled Japanese text. Text without Japanese characters is returned unchanged.
pub fn clean_text(text: &str) -> String {
    if !contains_japanese(text) {
        return text.to_string();
    }

    let mut cleaned = text.to_string();
    for (garbled, replacement) in MOJIBAKE {
        if cleaned.contains(garbled) {
            cleaned = cleaned.replace(garbled, replacement);
        }
    }
    if let Some(re) = CONTROL.as_ref() {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    if let Some(re) = WHITESPACE.as_ref() {
        cleaned = re.replace_all(&cleaned, " ").into_owned();
    }
    cleaned.trim().to_string()
}

fn clean_item(item: &SourceItem) -> SourceItem {
    SourceItem {
        title: clean_text(&item.title),
        url: item.url.clone(),
        content: clean_text(&item.content),
        raw_content: clean_text(&item.raw_content),
    }
}

/// Cleaned copies of the items in `new` whose URL is non-empty and seen
/// neither in `existing` nor earlier in `new`.
pub fn dedupe_and_merge(new: &[SourceItem], existing: &[SourceItem]) -> Vec<SourceItem> {
    let mut seen: HashSet<&str> = existing.iter().map(|s| s.url.as_str()).collect();
    new.iter()
        .filter(|item| !item.url.is_empty() && seen.insert(item.url.as_str()))
        .map(clean_item)
        .collect()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

fn title_or_placeholder(title: &str) -> String {
    if title.is_empty() {
        NO_TITLE.to_string()
    } else {
        clean_text(title)
    }
}

fn url_or_placeholder(url: &str) -> &str {
    if url.is_empty() { NO_URL } else { url }
}

/// Render one search's items as the `Sources:` block fed to the summarizer.
///
/// One section per unique non-empty URL, first occurrence wins. Raw content
/// is cut to `max_chars_per_source` characters.
pub fn format_for_prompt(items: &[SourceItem], max_chars_per_source: usize) -> String {
    let mut seen = HashSet::new();
    let mut out = String::from("Sources:\n\n");
    for item in items {
        if item.url.is_empty() || !seen.insert(item.url.as_str()) {
            continue;
        }
        let content = clean_text(&item.content);
        let raw = truncate_chars(&clean_text(&item.raw_content), max_chars_per_source);
        let _ = write!(
            out,
            "Source: {}\n===\nURL: {}\n===\nMost relevant content from source: {}\n===\nFull source content limited to {} characters: {}\n\n",
            title_or_placeholder(&item.title),
            url_or_placeholder(&item.url),
            content,
            max_chars_per_source,
            raw,
        );
    }
    out.trim().to_string()
}

/// `* title : url` bullet list, one line per item.
pub fn format_source_list(items: &[SourceItem]) -> String {
    items
        .iter()
        .map(|item| {
            format!(
                "* {} : {}",
                title_or_placeholder(&item.title),
                url_or_placeholder(&item.url)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
