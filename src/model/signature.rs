//! Crash signatures and the lenient comparison used to decide whether a crash reproduced.

use regex::Regex;
use serde::{Deserialize, Serialize};

use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CrashSignature {
    #[serde(rename = "crashType")]
    pub crash_type: String,
    #[serde(rename = "crashState")]
    pub crash_state: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimilarityScore {
    pub score: usize,
    pub required: usize,
}

impl SimilarityScore {
    pub fn matched(&self) -> bool {
        self.score >= self.required
    }
}

impl CrashSignature {
    pub fn new(crash_type: impl Into<String>, crash_state: Vec<String>) -> Self {
        Self {
            crash_type: crash_type.into(),
            crash_state,
        }
    }

    /// Normalizes the raw fields the signature service returns.
    pub fn from_service_fields(crash_state: &str, crash_type: &str) -> Self {
        Self {
            crash_type: crash_type.replace('\n', " "),
            crash_state: crash_state
                .split('\n')
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Scores `candidate` against `self` (the original): one point for the same type, one per
    /// candidate state line present anywhere in the original state. A match needs as many points as
    /// the original has state lines, so an empty original state matches on anything.
    pub fn similarity(&self, candidate: &CrashSignature) -> SimilarityScore {
        let mut score = 0usize;
        if candidate.crash_type == self.crash_type {
            score += 1;
        }
        score += candidate
            .crash_state
            .iter()
            .filter(|line| self.crash_state.contains(line))
            .count();
        SimilarityScore {
            score,
            required: self.crash_state.len(),
        }
    }

    pub fn is_similar(&self, candidate: &CrashSignature) -> bool {
        self.similarity(candidate).matched()
    }

    pub fn state_block(&self) -> String {
        self.crash_state.join("\n  ")
    }
}

fn anchor_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[/a][^<]+?>").expect("static regex"))
}

/// Removes anchor-like tags and decodes HTML entities in every line.
pub fn strip_html<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    lines
        .iter()
        .map(|line| unescape_html(&anchor_tag_re().replace_all(line.as_ref(), "")))
        .collect()
}

/// Decodes the named entities stack traces actually contain plus numeric references.
pub fn unescape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match tail.find(';').filter(|&end| end <= 10).and_then(|end| {
            decode_entity(&tail[1..end]).map(|c| (c, end))
        }) {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(|c: char| c == 'x' || c == 'X') {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Keeps only the first stack trace: leading blank lines are dropped and a `+----` divider that
/// follows collected content ends the block (the divider itself is not kept).
pub fn first_stacktrace_block<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in lines {
        let line = line.as_ref().trim_end();
        if line.starts_with("+----") && !out.is_empty() {
            break;
        }
        if !out.is_empty() || !line.is_empty() {
            out.push(line.to_string());
        }
    }
    out
}
