//! Cross-tool reference extraction.
//!
//! Pulls identifiers that link activities across tools out of free text:
//! Jira keys, GitHub issue/PR references, Confluence page ids and Figma file
//! keys. Output is ordered by first occurrence in the text and deduplicated.
//!
//! All patterns are immutable statics and every call walks the text with
//! fresh iterators, so repeated calls never share match position state.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static JIRA_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][A-Z0-9]+-\d+)\b").unwrap());
static REPO_ISSUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+)#(\d+)\b").unwrap());
static BARE_ISSUE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#(\d+)\b").unwrap());
static GITHUB_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:www\.)?github\.com/([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)/(?:pull|issues)/(\d+)")
        .unwrap()
});
static CONFLUENCE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"https?://[^\s/]+(?:/wiki)?/(?:spaces/[^\s/]+/pages/(\d+)|pages/viewpage\.action\?(?:\S*&)?pageId=(\d+))",
    )
    .unwrap()
});
static FIGMA_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:www\.)?figma\.com/(?:file|design|proto|board)/([A-Za-z0-9]+)").unwrap()
});
static ANY_URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").unwrap());

/// Nested payloads deeper than this are not walked.
const MAX_OBJECT_DEPTH: usize = 64;

struct Hit {
    start: usize,
    value: String,
}

/// Extract cross-tool references from one text field.
pub fn extract_refs(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut hits = Vec::new();
    // Spans owned by a recognised URL grammar. Nothing else may match inside them.
    let mut typed_spans: Vec<Range<usize>> = Vec::new();

    for caps in GITHUB_URL_RE.captures_iter(text) {
        let whole = &caps[0];
        let start = caps.get(0).map_or(0, |m| m.start());
        hits.push(Hit {
            start,
            value: format!("{}/{}#{}", &caps[1], &caps[2], &caps[3]),
        });
        typed_spans.push(url_span(text, start, whole.len()));
    }

    for caps in CONFLUENCE_URL_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let Some(page_id) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        hits.push(Hit {
            start: whole.start(),
            value: format!("confluence:{}", page_id.as_str()),
        });
        typed_spans.push(url_span(text, whole.start(), whole.len()));
    }

    for caps in FIGMA_URL_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        hits.push(Hit {
            start: whole.start(),
            value: format!("figma:{}", &caps[1]),
        });
        typed_spans.push(url_span(text, whole.start(), whole.len()));
    }

    let url_spans: Vec<Range<usize>> = ANY_URL_RE.find_iter(text).map(|m| m.range()).collect();

    for caps in REPO_ISSUE_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if inside(&url_spans, whole.start()) {
            continue;
        }
        hits.push(Hit {
            start: whole.start(),
            value: format!("{}#{}", &caps[1], &caps[2]),
        });
    }

    // Jira keys inside generic URLs (e.g. `/browse/AUTH-12`) still count.
    for m in JIRA_KEY_RE.find_iter(text) {
        if inside(&typed_spans, m.start()) {
            continue;
        }
        hits.push(Hit {
            start: m.start(),
            value: m.as_str().to_string(),
        });
    }

    for caps in BARE_ISSUE_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if inside(&url_spans, whole.start()) || attached_to_word(text, whole.start()) {
            continue;
        }
        hits.push(Hit {
            start: whole.start(),
            value: format!("local#{}", &caps[1]),
        });
    }

    hits.sort_by_key(|h| h.start);
    dedup_in_order(hits.into_iter().map(|h| h.value))
}

/// Union of refs across several text fields, deduplicated across fields.
pub fn extract_refs_from_multiple<I, S>(fields: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    dedup_in_order(
        fields
            .into_iter()
            .flat_map(|field| extract_refs(field.as_ref())),
    )
}

/// Refs from every string leaf of an arbitrary JSON payload.
pub fn extract_refs_from_object(value: &Value) -> Vec<String> {
    let mut leaves = Vec::new();
    collect_strings(value, 0, &mut leaves);
    extract_refs_from_multiple(leaves)
}

fn collect_strings<'a>(value: &'a Value, depth: usize, out: &mut Vec<&'a str>) {
    if depth > MAX_OBJECT_DEPTH {
        return;
    }
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => {
            for item in items {
                collect_strings(item, depth + 1, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_strings(item, depth + 1, out);
            }
        }
        _ => {}
    }
}

/// A matched URL owns everything up to the next whitespace.
fn url_span(text: &str, start: usize, matched_len: usize) -> Range<usize> {
    let tail = &text[start + matched_len..];
    let extra = tail.find(char::is_whitespace).unwrap_or(tail.len());
    start..start + matched_len + extra
}

fn inside(spans: &[Range<usize>], pos: usize) -> bool {
    spans.iter().any(|span| span.contains(&pos))
}

/// `#N` glued to a preceding word is not an issue ref (`repo#1`, `&#39;`, `C#1`).
fn attached_to_word(text: &str, hash_pos: usize) -> bool {
    text[..hash_pos]
        .chars()
        .next_back()
        .is_some_and(|c| c.is_alphanumeric() || matches!(c, '/' | '_' | '.' | '-' | '&'))
}

fn dedup_in_order(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}
