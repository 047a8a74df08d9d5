//! Line-level parsing of the upstream chat stream.
//!
//! The upstream sends newline-delimited JSON objects, but lines can arrive
//! truncated. Each line goes through a two-stage pipeline: a strict JSON
//! parse (with a closing brace appended when missing), then a regex
//! extraction of the `"text"` field. A line that defeats both is skipped,
//! never fatal.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::providers::CohereStreamEvent;

/// `"text":"..."`, tolerating escaped quotes and a missing closing quote.
static TEXT_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""text"\s*:\s*"((?:[^"\\]|\\.)*)"?"#).expect("valid regex"));

/// A backslash wedged between a non-space character and a latin letter.
static STRAY_BACKSLASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([^\s])\\([a-zA-Z])").expect("valid regex"));

/// A single Kurdish letter or comma wrapped in quotes by the upstream.
static QUOTED_KURDISH_LETTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([ەڕێۆ،ن])""#).expect("valid regex"));

/// Outcome of parsing one upstream line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    /// Cleaned text fragment ready to forward.
    Parsed(String),
    /// Nothing to forward: no text field, empty text, or unrecoverable.
    Skipped,
}

impl ParsedLine {
    pub fn into_text(self) -> Option<String> {
        match self {
            ParsedLine::Parsed(t) => Some(t),
            ParsedLine::Skipped => None,
        }
    }
}

/// Parse one line of the upstream body.
pub fn try_parse(line: &str) -> ParsedLine {
    let line = line.trim();
    if !line.contains("\"text\"") {
        return ParsedLine::Skipped;
    }

    match parse_json(line) {
        Ok(Some(text)) => ParsedLine::Parsed(clean_text(&text)),
        Ok(None) => ParsedLine::Skipped,
        Err(json_err) => match extract_text(line) {
            Some(text) => {
                tracing::debug!(error = %json_err, "recovered text from malformed line");
                ParsedLine::Parsed(text)
            }
            None => {
                tracing::warn!(error = %json_err, line, "dropping unparsable upstream line");
                ParsedLine::Skipped
            }
        },
    }
}

/// Stage one: strict JSON, closing the object if the line was cut short.
fn parse_json(line: &str) -> Result<Option<String>, serde_json::Error> {
    let event: CohereStreamEvent = if line.ends_with('}') {
        serde_json::from_str(line)?
    } else {
        serde_json::from_str(&format!("{line}}}"))?
    };
    Ok(event.text.filter(|t| !t.is_empty()))
}

/// Stage two: pull the `text` value out with a regex. Only newline and quote
/// escapes are undone here.
fn extract_text(line: &str) -> Option<String> {
    let raw = TEXT_FIELD.captures(line)?.get(1)?.as_str();
    if raw.is_empty() {
        return None;
    }
    Some(raw.replace("\\n", "\n").replace("\\\"", "\""))
}

/// Undo encoding artifacts the upstream leaves in decoded text.
///
/// Literal `\n` and `\"` sequences are unescaped, a backslash between a
/// non-space character and a latin letter is dropped, and quotes wrapped
/// around a single `ە ڕ ێ ۆ ، ن` are removed.
pub fn clean_text(text: &str) -> String {
    let text = text.replace("\\n", "\n").replace("\\\"", "\"");
    let text = STRAY_BACKSLASH.replace_all(&text, "$1$2");
    QUOTED_KURDISH_LETTER.replace_all(&text, "$1").into_owned()
}

/// Reassembles newline-delimited lines from arbitrary byte chunks.
///
/// Splitting happens on raw bytes, so a multi-byte character cut by a chunk
/// boundary is decoded only once the whole line is present.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completed, without the
    /// trailing newline. Blank lines are dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let rest = self.pending.split_off(pos + 1);
            let line = std::mem::replace(&mut self.pending, rest);
            let line = String::from_utf8_lossy(&line[..pos]);
            if !line.trim().is_empty() {
                lines.push(line.into_owned());
            }
        }
        lines
    }

    /// The unterminated tail left when the body ends, if any.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&rest);
        if line.trim().is_empty() {
            None
        } else {
            Some(line.into_owned())
        }
    }
}
