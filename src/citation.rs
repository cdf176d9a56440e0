//! `[PDF: <filename>, page <N>]` references embedded in model replies, and
//! locating the cited passage on a page.

use regex::Regex;
use serde::Serialize;
use std::ops::Range;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Citation {
    pub filename: String,
    pub page: usize,
    /// Byte range of the marker inside the reply text.
    pub span: Range<usize>,
}

fn citation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[PDF:\s*([^\[\]]+?),\s*page\s+(\d+)\]").expect("citation pattern is valid")
    })
}

/// Every well-formed citation in `text`, in order. Never fails; page 0 and
/// unparseable page numbers are skipped.
pub fn parse_citations(text: &str) -> Vec<Citation> {
    citation_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let filename = caps.get(1)?.as_str().trim().to_string();
            let page: usize = caps.get(2)?.as_str().parse().ok()?;
            if page == 0 {
                return None;
            }
            Some(Citation {
                filename,
                page,
                span: whole.range(),
            })
        })
        .collect()
}

/// The sentence a citation is attached to: the text between the previous
/// sentence boundary (or previous citation) and the marker.
pub fn cited_passage<'a>(text: &'a str, citation: &Citation) -> Option<&'a str> {
    let before = text.get(..citation.span.start)?;
    let start = before
        .rfind(['.', '!', '?', '\n', ']'])
        .map(|i| i + 1)
        .unwrap_or(0);
    let passage = before[start..]
        .trim()
        .trim_matches(|c: char| c == '`' || c == '*' || c == '(' || c.is_whitespace());
    if passage.is_empty() {
        None
    } else {
        Some(passage)
    }
}

/// True when every character of `pattern` appears in `text` in order,
/// ignoring case. Characters need not be contiguous.
pub fn fuzzy_match(text: &str, pattern: &str) -> bool {
    let mut haystack = text.chars().flat_map(char::to_lowercase);
    pattern
        .chars()
        .flat_map(char::to_lowercase)
        .all(|wanted| haystack.any(|c| c == wanted))
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Index of the first fragment containing `search`: exact case-insensitive
/// substring first, then subsequence match.
pub fn locate_passage<S: AsRef<str>>(fragments: &[S], search: &str) -> Option<usize> {
    let needle = normalize(search);
    if needle.is_empty() {
        return None;
    }
    fragments
        .iter()
        .position(|f| normalize(f.as_ref()).contains(&needle))
        .or_else(|| {
            fragments
                .iter()
                .position(|f| fuzzy_match(f.as_ref(), &needle))
        })
}
