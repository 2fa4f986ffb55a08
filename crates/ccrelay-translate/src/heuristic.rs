//! Diagnostic-only scoring for responses that announce a tool call without
//! making one ("I'll now update the configuration:" followed by nothing).
//! Callers log a warning; the response itself is never altered.

use regex::Regex;
use std::sync::LazyLock;

static TRAILING_COLON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".*\s?:\s?$").expect("trailing colon regex"));
static INTENT_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i).*(i'll|let me|i will|i'm going to|i am going to).*")
        .expect("intent phrase regex")
});

/// Score the final sentence of the assistant text: one point for trailing
/// colon punctuation, one for an announced intent. Both together suggest a
/// tool call that never materialized.
pub fn looks_like_failed_tool_call(text: &str) -> bool {
    let Some(sentence) = last_sentence(text) else {
        return false;
    };

    let mut score = 0;
    if TRAILING_COLON.is_match(sentence) {
        score += 1;
    }
    if INTENT_PHRASE.is_match(sentence) {
        score += 1;
    }
    score >= 2
}

fn last_sentence(text: &str) -> Option<&str> {
    let line = text.trim_end().lines().last()?.trim();
    if line.is_empty() {
        return None;
    }
    // split on sentence-ending punctuation, keep the final fragment
    let start = line
        .rfind(". ")
        .or_else(|| line.rfind("! "))
        .or_else(|| line.rfind("? "))
        .map(|i| i + 2)
        .unwrap_or(0);
    Some(line[start..].trim())
}
