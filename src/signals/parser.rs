//! Signal parsing from the reviewer's reply.
//!
//! The reviewer is told to end its reply with a `SIGNAL:<token>` line. Only
//! the last few non-empty lines are inspected, newest first, so a token quoted
//! earlier in the reply (e.g. while explaining the rules) never wins.

use super::types::{ParsedSignal, Signal};
use regex::Regex;
use std::sync::LazyLock;

/// Default number of trailing non-empty lines inspected.
pub const DEFAULT_LOOKBACK_LINES: usize = 5;

// Tolerates markdown emphasis and inline code around the marker.
static SIGNAL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^SIGNAL\s*:\s*([a-z_]+)\s*(?:[-:]\s*(.+?))?\s*[.!]?$").unwrap()
});

/// Parser for extracting the outcome signal from a reviewer reply.
#[derive(Debug, Clone)]
pub struct SignalParser {
    lookback: usize,
}

impl SignalParser {
    pub fn new(lookback: usize) -> Self {
        Self {
            lookback: lookback.max(1),
        }
    }

    /// Find the last signal marker within the lookback window.
    ///
    /// Only the newest marker line counts. Returns `None` when no marker is
    /// present, when that marker's token is unknown, or when it is outside
    /// `allowed`. An empty `allowed` slice accepts any known signal.
    pub fn parse(&self, text: &str, allowed: &[Signal]) -> Option<ParsedSignal> {
        text.lines()
            .rev()
            .map(clean_line)
            .filter(|line| !line.is_empty())
            .take(self.lookback)
            .find(|line| SIGNAL_REGEX.is_match(line))
            .and_then(|line| parse_marker(&line))
            .filter(|parsed| allowed.is_empty() || allowed.contains(&parsed.signal))
    }
}

impl Default for SignalParser {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKBACK_LINES)
    }
}

fn clean_line(line: &str) -> String {
    line.trim()
        .trim_matches(|c| c == '*' || c == '`')
        .trim()
        .to_string()
}

fn parse_marker(line: &str) -> Option<ParsedSignal> {
    let caps = SIGNAL_REGEX.captures(line)?;
    let signal = caps.get(1)?.as_str().parse::<Signal>().ok()?;
    let detail = caps
        .get(2)
        .map(|m| m.as_str().trim().trim_end_matches(['*', '`']).trim().to_string())
        .filter(|d| !d.is_empty());
    Some(ParsedSignal { signal, detail })
}

/// Remove marker lines so the reply can be relayed to the primary session.
pub fn strip_signal_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !SIGNAL_REGEX.is_match(&clean_line(line)))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Convenience function using the default lookback.
pub fn extract_signal(text: &str, allowed: &[Signal]) -> Option<ParsedSignal> {
    SignalParser::default().parse(text, allowed)
}
