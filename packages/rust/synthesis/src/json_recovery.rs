//! Recover a JSON object from free-form model output.
//!
//! Strategies run in order until one yields an object:
//! 1. direct parse
//! 2. strip known boilerplate prefixes and fence markers
//! 3. fenced code blocks
//! 4. balanced-brace scan that skips braces inside strings
//! 5. first `{` to last `}` with trailing commas and raw newlines repaired

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

pub type JsonObject = Map<String, Value>;

const BOILERPLATE_PREFIXES: &[&str] = &[
    "here's the analysis:",
    "here is the analysis:",
    "here's the json:",
    "here is the json:",
    "```json",
    "```",
];

/// The first JSON object recoverable from `text`, if any.
pub fn extract_json(text: &str) -> Option<JsonObject> {
    let cleaned = text.trim().trim_start_matches('\u{feff}').trim();
    if cleaned.is_empty() {
        return None;
    }

    let strategies: [(&str, fn(&str) -> Option<JsonObject>); 5] = [
        ("direct", parse_object),
        ("strip_boilerplate", strip_boilerplate),
        ("fenced_block", fenced_blocks),
        ("brace_scan", brace_scan),
        ("repair", repair_span),
    ];

    for (name, strategy) in strategies {
        if let Some(obj) = strategy(cleaned) {
            debug!(strategy = name, "recovered JSON from model output");
            return Some(obj);
        }
    }
    None
}

fn parse_object(text: &str) -> Option<JsonObject> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

fn strip_boilerplate(text: &str) -> Option<JsonObject> {
    let mut rest = text.trim();
    loop {
        let Some(prefix) = BOILERPLATE_PREFIXES.iter().find(|p| {
            rest.get(..p.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(p))
        }) else {
            break;
        };
        rest = rest[prefix.len()..].trim_start();
    }
    let rest = rest.trim_end();
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    parse_object(rest)
}

fn fenced_blocks(text: &str) -> Option<JsonObject> {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?is)```(?:json)?\s*\n?(.*?)```").expect("valid regex")
    });

    FENCE_RE.captures_iter(text).find_map(|caps| {
        let body = caps[1].trim();
        if body.starts_with('{') && body.ends_with('}') {
            parse_object(body)
        } else {
            None
        }
    })
}

/// Try each top-level balanced `{...}` span in turn.
fn brace_scan(text: &str) -> Option<JsonObject> {
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        if let Some(obj) = parse_object(&text[s..=i]) {
                            return Some(obj);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn repair_span(text: &str) -> Option<JsonObject> {
    static OBJ_COMMA_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r",\s*\}").expect("valid regex"));
    static ARR_COMMA_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r",\s*\]").expect("valid regex"));

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }

    let span = escape_newlines_in_strings(&text[start..=end]);
    let fixed = OBJ_COMMA_RE.replace_all(&span, "}");
    let fixed = ARR_COMMA_RE.replace_all(&fixed, "]");
    parse_object(&fixed)
}

/// Raw newlines are invalid inside JSON strings; models emit them anyway.
fn escape_newlines_in_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            match c {
                _ if escaped => {
                    escaped = false;
                    out.push(c);
                }
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                _ => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
    }
    out
}
