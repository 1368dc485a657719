use serde_json::{Map, Value};

pub const RAW_EXCERPT_CAP: usize = 2048;

/// Pull a single JSON object out of possibly-noisy assistant text.
///
/// Attempts, in order: whole-string parse, an escape-aware brace scan from the
/// first `{` (first balanced close, then the last close), and the same two
/// steps applied to the inner content of the first fenced code block.
/// Non-object roots are wrapped so callers always receive an object.
pub fn extract_payload(text: &str) -> Option<Map<String, Value>> {
    if let Some(payload) = extract_without_fence(text) {
        return Some(payload);
    }
    let fenced = fenced_block_content(text)?;
    extract_without_fence(fenced)
}

fn extract_without_fence(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(normalise_root(value));
    }
    for candidate in brace_candidates(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return Some(normalise_root(value));
        }
    }
    None
}

/// Candidate substrings starting at the first `{`: up to the first close that
/// balances it, then up to the last close observed at depth zero (or, when
/// the text is truncated mid-object, the last `}` anywhere).
fn brace_candidates(text: &str) -> Vec<&str> {
    let Some(start) = text.find('{') else {
        return Vec::new();
    };
    let tail = &text[start..];

    let mut depth = 0i64;
    let mut in_string = false;
    let mut escaped = false;
    let mut balanced_ends = Vec::new();
    for (offset, ch) in tail.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    balanced_ends.push(offset);
                }
            }
            _ => {}
        }
    }

    let mut candidates = Vec::new();
    if let Some(first) = balanced_ends.first() {
        candidates.push(&tail[..=*first]);
    }
    if let Some(last) = balanced_ends.last() {
        if balanced_ends.len() > 1 {
            candidates.push(&tail[..=*last]);
        }
    }
    if candidates.is_empty() {
        if let Some(last_close) = tail.rfind('}') {
            candidates.push(&tail[..=last_close]);
        }
    }
    candidates
}

fn fenced_block_content(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    let body_start = after_fence.find('\n').map(|idx| idx + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

fn normalise_root(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Array(items) => Map::from_iter([("items".to_string(), Value::Array(items))]),
        scalar => Map::from_iter([("value".to_string(), scalar)]),
    }
}

/// Synthetic handoff used when extraction and every repair attempt failed.
pub fn parse_failure_payload(raw: &str) -> Map<String, Value> {
    Map::from_iter([
        (
            "error".to_string(),
            Value::String("json_parse_failed".to_string()),
        ),
        (
            "raw_excerpt".to_string(),
            Value::String(truncate_to_char_boundary(raw, RAW_EXCERPT_CAP).to_string()),
        ),
    ])
}

pub fn truncate_to_char_boundary(raw: &str, cap: usize) -> &str {
    if raw.len() <= cap {
        return raw;
    }
    let mut end = cap;
    while end > 0 && !raw.is_char_boundary(end) {
        end -= 1;
    }
    &raw[..end]
}
