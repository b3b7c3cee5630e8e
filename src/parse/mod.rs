use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::errors::{ReportError, Result};
use crate::wire::{PromptBatch, ReplyFormat};

/// Recover exactly one paragraph per requested entry, in request order.
pub fn parse_reply(reply: &str, batch: &PromptBatch) -> Result<Vec<String>> {
    match batch.format {
        ReplyFormat::Delimited => parse_delimited(reply, batch),
        ReplyFormat::Json => parse_json(reply, batch),
    }
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*(?:\*\*)?#{1,6}[ \t]*(\d+)\.[ \t]*(.*?)(?:\*\*)?[ \t]*\r?$")
            .expect("heading pattern is valid")
    })
}

struct Block<'a> {
    number: usize,
    title: &'a str,
    body: &'a str,
}

fn blocks(reply: &str) -> Vec<Block<'_>> {
    let heads: Vec<_> = heading_re().captures_iter(reply).collect();
    let mut out = Vec::with_capacity(heads.len());
    for (i, caps) in heads.iter().enumerate() {
        let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
        let end = heads
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(reply.len());
        let number = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let title = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
        out.push(Block { number, title, body: reply[whole..end].trim() });
    }
    out
}

fn parse_delimited(reply: &str, batch: &PromptBatch) -> Result<Vec<String>> {
    let found = blocks(strip_fences(reply));
    let requested = batch.len();
    let located = found.iter().filter(|b| !b.body.is_empty()).count();

    if found.len() != requested {
        let missing = batch.entries.get(found.len()).map(|e| e.label.clone());
        return Err(ReportError::ParseMismatch { requested, parsed: located, missing });
    }

    let mut out = Vec::with_capacity(requested);
    for (i, (block, entry)) in found.iter().zip(&batch.entries).enumerate() {
        // Numbering is authoritative; a title that drifts from the request is tolerated.
        if block.number != i + 1 || block.body.is_empty() {
            tracing::debug!(
                expected = i + 1,
                got = block.number,
                title = block.title,
                "unmatched reply block"
            );
            return Err(ReportError::ParseMismatch {
                requested,
                parsed: located,
                missing: Some(entry.label.clone()),
            });
        }
        out.push(block.body.to_string());
    }
    Ok(out)
}

fn parse_json(reply: &str, batch: &PromptBatch) -> Result<Vec<String>> {
    let text = strip_fences(reply);
    let object: Map<String, Value> = match serde_json::from_str(text) {
        Ok(Value::Object(m)) => m,
        _ => {
            // Fallback: the first balanced {...} in the text.
            let candidate = extract_first_json_object(text)
                .ok_or_else(|| ReportError::InvalidJson(snippet(text)))?;
            match serde_json::from_str(&candidate) {
                Ok(Value::Object(m)) => m,
                _ => return Err(ReportError::InvalidJson(snippet(text))),
            }
        }
    };

    Ok(batch
        .entries
        .iter()
        .map(|e| match object.get(&e.label).or_else(|| object.get(&e.heading)) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        })
        .collect())
}

/// Drop a surrounding ``` fence some models add despite instructions.
fn strip_fences(s: &str) -> &str {
    let t = s.trim();
    if let Some(rest) = t.strip_prefix("```") {
        let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
        return rest.trim_end().strip_suffix("```").unwrap_or(rest).trim();
    }
    t
}

fn snippet(s: &str) -> String {
    s.chars().take(200).collect()
}

/// Extracts the first top-level JSON object substring from a string.
/// Handles nested braces and braces inside string literals; returns None if not found.
fn extract_first_json_object(s: &str) -> Option<String> {
    let mut start = None;
    let mut depth = 0usize;
    let mut in_str = false;
    let mut escaped = false;

    for (i, b) in s.bytes().enumerate() {
        if in_str {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_str = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' if start.is_some() => in_str = true,
            b'{' => {
                if start.is_none() {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return start.map(|st| s[st..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}
