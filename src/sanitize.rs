//! Text and payload sanitization shared by request translation and response parsing.
//!
//! Kiro's wire protocol leaks AWS SDK/event-stream protocol noise into lines
//! that otherwise look like assistant prose, and its responses are sometimes
//! truncated mid-token. This module never panics and never raises: callers
//! get back the best-effort cleaned value, falling back to the original
//! input when repair isn't possible.

use regex_lite::Regex;
use serde_json::Value;

/// Line prefixes that indicate AWS SDK / event-stream protocol noise rather
/// than assistant content.
const NOISE_PREFIXES: &[&str] = &[
    "event-type",
    "message-type",
    "content-length",
    "amz-sdk-request",
    "x-amzn",
    "amzn-",
    "transfer-encoding",
];

const NOISE_SUBSTRING: &str = "content-type: application/json";

/// Options controlling [`sanitize_assistant_text`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SanitizeOpts {
    pub allow_blank: bool,
    pub collapse_whitespace: bool,
    pub trim: bool,
    pub drop_empty_lines: bool,
}

impl SanitizeOpts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_blank(mut self, v: bool) -> Self {
        self.allow_blank = v;
        self
    }

    pub fn collapse_whitespace(mut self, v: bool) -> Self {
        self.collapse_whitespace = v;
        self
    }

    pub fn trim(mut self, v: bool) -> Self {
        self.trim = v;
        self
    }

    pub fn drop_empty_lines(mut self, v: bool) -> Self {
        self.drop_empty_lines = v;
        self
    }
}

fn is_noise_line(line: &str) -> bool {
    let trimmed = line.trim_start().trim_start_matches(':');
    let lower = trimmed.to_ascii_lowercase();
    NOISE_PREFIXES.iter().any(|p| lower.starts_with(p)) || lower.contains(NOISE_SUBSTRING)
}

/// Strip carriage returns, control characters (except `\n`/`\t`), and
/// protocol-noise lines from assistant text. Idempotent and UTF-8 valid by
/// construction.
pub fn sanitize_assistant_text(s: &str, opts: SanitizeOpts) -> String {
    let without_cr = s.replace('\r', "");

    let mut lines: Vec<String> = Vec::new();
    for raw_line in without_cr.split('\n') {
        if is_noise_line(raw_line) {
            continue;
        }
        let cleaned: String = raw_line
            .chars()
            .filter(|&c| c == '\t' || !c.is_control())
            .collect();
        lines.push(cleaned);
    }

    let mut joined = lines.join("\n");

    if opts.drop_empty_lines {
        joined = joined
            .lines()
            .filter(|l| !l.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n");
    }

    if opts.collapse_whitespace {
        joined = joined.split_whitespace().collect::<Vec<_>>().join(" ");
    }

    if opts.trim {
        joined = joined.trim().to_string();
    }

    if !opts.allow_blank && joined.trim().is_empty() {
        return String::new();
    }

    joined
}

/// Outcome of [`safe_parse_json`].
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    Parsed(Value),
    Unparsed(String),
}

impl ParseOutcome {
    pub fn into_value(self) -> Option<Value> {
        match self {
            ParseOutcome::Parsed(v) => Some(v),
            ParseOutcome::Unparsed(_) => None,
        }
    }
}

/// Attempt to parse possibly-truncated or slightly-malformed JSON. Never
/// raises: on total failure, returns the original input unchanged.
pub fn safe_parse_json(raw: &str) -> ParseOutcome {
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        return ParseOutcome::Parsed(v);
    }

    let mut candidate = raw.trim_end().to_string();
    for dangling in ["\\u00", "\\u0", "\\u", "\\"] {
        if candidate.ends_with(dangling) {
            candidate.truncate(candidate.len() - dangling.len());
            break;
        }
    }

    let repaired = quote_unquoted_keys(&strip_trailing_commas(&candidate));
    if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
        return ParseOutcome::Parsed(v);
    }

    ParseOutcome::Unparsed(raw.to_string())
}

fn strip_trailing_commas(s: &str) -> String {
    Regex::new(r",(\s*[}\]])")
        .map(|re| re.replace_all(s, "$1").into_owned())
        .unwrap_or_else(|_| s.to_string())
}

fn quote_unquoted_keys(s: &str) -> String {
    Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)(\s*:)"#)
        .map(|re| re.replace_all(s, "$1\"$2\"$3").into_owned())
        .unwrap_or_else(|_| s.to_string())
}

/// Canonicalize tool-call arguments to a JSON object string. Falls back to
/// `safe_parse_json`'s repair pass; returns `""` on total failure.
pub fn normalize_arguments(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }
    match safe_parse_json(raw) {
        ParseOutcome::Parsed(v) => serde_json::to_string(&v).unwrap_or_default(),
        ParseOutcome::Unparsed(_) => String::new(),
    }
}

/// Strip AWS event-stream binary framing, returning the concatenated,
/// denoised payload lines. Returns the input unchanged when it doesn't look
/// framed, or as soon as a frame fails its bounds check (never returns a
/// partially decoded frame).
pub fn strip_aws_event_stream(bytes: &[u8]) -> Vec<u8> {
    if !looks_framed(bytes) {
        return bytes.to_vec();
    }

    let mut payload_lines: Vec<String> = Vec::new();
    let mut offset = 0usize;

    while offset + 8 <= bytes.len() {
        let total_len = read_u32_be(bytes, offset) as usize;
        let header_len = read_u32_be(bytes, offset + 4) as usize;

        if total_len < 12 || offset + total_len > bytes.len() {
            break;
        }

        let payload_start = offset + 8 + header_len;
        let payload_end = offset + total_len - 4;
        if payload_start > payload_end || payload_end > bytes.len() {
            break;
        }

        if let Ok(text) = std::str::from_utf8(&bytes[payload_start..payload_end]) {
            for line in text.lines() {
                if line.is_empty() || is_noise_line(line) {
                    continue;
                }
                payload_lines.push(line.to_string());
            }
        }

        offset += total_len;
    }

    if payload_lines.is_empty() {
        return bytes.to_vec();
    }

    payload_lines.join("\n\n").into_bytes()
}

fn looks_framed(bytes: &[u8]) -> bool {
    if bytes.len() < 12 {
        return false;
    }
    let total_len = read_u32_be(bytes, 0) as usize;
    let header_len = read_u32_be(bytes, 4) as usize;
    total_len >= 12 && total_len <= bytes.len() && header_len < total_len
}

fn read_u32_be(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame(header_len: u32, payload: &[u8]) -> Vec<u8> {
        let total_len = 12 + header_len as usize + payload.len();
        let mut buf = Vec::new();
        buf.extend((total_len as u32).to_be_bytes());
        buf.extend(header_len.to_be_bytes());
        buf.extend(std::iter::repeat(0u8).take(header_len as usize));
        buf.extend(payload);
        buf.extend([0u8; 4]);
        buf
    }

    #[test]
    fn sanitize_strips_noise_lines_and_control_chars() {
        let input = "hello\r\nx-amzn-trace: abc\ncontent-length: 12\nworld\u{0007}";
        let out = sanitize_assistant_text(input, SanitizeOpts::new());
        assert_eq!(out, "hello\nworld");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let opts = SanitizeOpts::new().trim(true).collapse_whitespace(true);
        let input = "  amz-sdk-request: x\n  Hello   World  \n";
        let once = sanitize_assistant_text(input, opts);
        let twice = sanitize_assistant_text(&once, opts);
        assert_eq!(once, twice);
    }

    #[test]
    fn safe_parse_json_repairs_trailing_comma() {
        let outcome = safe_parse_json(r#"{"a": 1, "b": 2,}"#);
        match outcome {
            ParseOutcome::Parsed(v) => assert_eq!(v["b"], 2),
            ParseOutcome::Unparsed(_) => panic!("expected repair to succeed"),
        }
    }

    #[test]
    fn safe_parse_json_never_panics_on_garbage() {
        let outcome = safe_parse_json("not json at all {{{");
        match outcome {
            ParseOutcome::Unparsed(s) => assert_eq!(s, "not json at all {{{"),
            ParseOutcome::Parsed(_) => panic!("garbage should not parse"),
        }
    }

    #[test]
    fn normalize_arguments_falls_back_to_empty_string() {
        assert_eq!(normalize_arguments("not json"), "");
        assert_eq!(normalize_arguments(r#"{"q": 5}"#), r#"{"q":5}"#);
    }

    #[test]
    fn strip_event_stream_passes_through_unframed_input() {
        let input = b"{\"content\":\"hello\"}";
        assert_eq!(strip_aws_event_stream(input), input.to_vec());
    }

    #[test]
    fn strip_event_stream_concatenates_denoised_payloads() {
        let frame1 = make_frame(0, b":event-type foo\n{\"content\":\"a\"}");
        let frame2 = make_frame(0, b"{\"content\":\"b\"}");
        let mut bytes = frame1;
        bytes.extend(frame2);

        let out = strip_aws_event_stream(&bytes);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "{\"content\":\"a\"}\n\n{\"content\":\"b\"}"
        );
    }
}
