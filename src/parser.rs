//! Extraction of typed decisions from free-form model output.
//!
//! Every function here is marker based and total: a missing marker or an
//! out-of-range value yields an explicit "not parsed" value, never a panic.

use crate::data_models::{Decision, Evaluation, PageSelection, SearchResultRecord, TimeRange};
use crate::prompts::{collapse_whitespace, truncate_chars};

/// Number of results the model is asked to pick per attempt.
pub const SELECTED_PAGE_COUNT: usize = 2;

const SELECTED_RESULTS_MARKER: &str = "selected results";
const REASONING_MARKER: &str = "reasoning";
const EVALUATION_MARKER: &str = "evaluation";
const DECISION_MARKER: &str = "decision";

/// Returns the text after `marker` if `line` starts with it, ignoring case,
/// surrounding whitespace and markdown emphasis/list prefixes.
fn after_marker<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let line = line
        .trim()
        .trim_start_matches(|c: char| c == '*' || c == '#' || c == '-' || c.is_whitespace());
    let head = line.get(..marker.len())?;
    if !head.eq_ignore_ascii_case(marker) {
        return None;
    }
    let rest = &line[marker.len()..];
    Some(rest.trim_start_matches(|c: char| c == ':' || c == '*' || c.is_whitespace()))
}

/// Scans `Key: value` lines for the search query and the recency window.
///
/// Returns an empty query when no query line is present; the time range
/// defaults to [`TimeRange::None`].
pub fn parse_query_response(text: &str, max_query_chars: usize) -> (String, TimeRange) {
    let mut query = String::new();
    let mut time_range = TimeRange::None;

    for line in text.trim().lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();
        if key.contains("query") {
            query = clean_query(value, max_query_chars);
        } else if key.contains("time") || key.contains("range") {
            time_range = validate_time_range(value);
        }
    }

    (query, time_range)
}

/// Strips quote and bracket characters, collapses whitespace and bounds the
/// length.
pub fn clean_query(query: &str, max_chars: usize) -> String {
    let stripped: String = query
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '[' | ']'))
        .collect();
    truncate_chars(&collapse_whitespace(&stripped), max_chars)
        .trim_end()
        .to_string()
}

/// Case-insensitive match against `d`, `w`, `m`, `y`, `none`; anything else
/// is [`TimeRange::None`].
pub fn validate_time_range(value: &str) -> TimeRange {
    value.parse().unwrap_or(TimeRange::None)
}

/// Deterministic query used when the model cannot produce one: the first
/// `max_words` whitespace-separated tokens of the user's question.
pub fn fallback_query(user_query: &str, max_words: usize) -> String {
    user_query
        .split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reads the `Selected Results:` and `Reasoning:` lines.
///
/// `None` when either marker is missing or the selection line carries no
/// numbers at all.
pub fn parse_page_selection_response(text: &str) -> Option<PageSelection> {
    let mut numbers: Option<Vec<usize>> = None;
    let mut reasoning: Option<String> = None;

    for line in text.trim().lines() {
        if let Some(rest) = after_marker(line, SELECTED_RESULTS_MARKER) {
            numbers = Some(numeric_tokens(rest));
        } else if let Some(rest) = after_marker(line, REASONING_MARKER) {
            reasoning = Some(rest.trim().to_string());
        }
    }

    let selected_result_numbers = numbers.filter(|n| !n.is_empty())?;
    Some(PageSelection {
        selected_result_numbers,
        reasoning: reasoning?,
    })
}

fn numeric_tokens(text: &str) -> Vec<usize> {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|t| !t.is_empty())
        .filter_map(|t| t.parse().ok())
        .collect()
}

/// A selection is usable only if it names exactly [`SELECTED_PAGE_COUNT`]
/// results, each within `1..=available_count`.
pub fn validate_page_selection(parsed: &PageSelection, available_count: usize) -> bool {
    if parsed.selected_result_numbers.len() != SELECTED_PAGE_COUNT {
        return false;
    }
    parsed
        .selected_result_numbers
        .iter()
        .all(|&n| n >= 1 && n <= available_count)
}

/// URLs of the selected results, in rank order.
pub fn selected_urls(results: &[SearchResultRecord], selection: &PageSelection) -> Vec<String> {
    results
        .iter()
        .filter(|r| selection.selected_result_numbers.contains(&r.rank))
        .map(|r| r.url.clone())
        .collect()
}

/// Reads the `Evaluation:` and `Decision:` lines. The decision is kept only if
/// it is exactly `answer` or `refine` once case and surrounding punctuation
/// are ignored.
pub fn parse_evaluation_response(text: &str) -> Evaluation {
    let mut evaluation = String::new();
    let mut decision = None;

    for line in text.trim().lines() {
        if let Some(rest) = after_marker(line, EVALUATION_MARKER) {
            evaluation = rest.trim().to_string();
        } else if let Some(rest) = after_marker(line, DECISION_MARKER) {
            decision = parse_decision(rest);
        }
    }

    Evaluation {
        text: evaluation,
        decision,
    }
}

fn parse_decision(value: &str) -> Option<Decision> {
    let value = value
        .trim()
        .trim_matches(|c: char| matches!(c, '\'' | '"' | '[' | ']' | '*' | '.' | '`'))
        .to_lowercase();
    match value.as_str() {
        "answer" => Some(Decision::Answer),
        "refine" => Some(Decision::Refine),
        _ => None,
    }
}
