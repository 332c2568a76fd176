//! Best-effort JSON extraction from free-form text.
//!
//! Agents and workflow tools often wrap JSON in prose or log noise. The
//! scanner walks brace/bracket regions with string and escape awareness,
//! tries each balanced region in order, and falls back to parsing the whole
//! input.

use serde_json::Value;

/// Byte index of the bracket closing the region opened at `start`.
///
/// Returns `None` when `start` is not an opener, when closers are mismatched,
/// or when the input ends before the region closes.
pub fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if !matches!(bytes.get(start), Some(b'{') | Some(b'[')) {
        return None;
    }

    let mut expected: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => expected.push(b'}'),
            b'[' => expected.push(b']'),
            b'}' | b']' => {
                if expected.pop() != Some(b) {
                    return None;
                }
                if expected.is_empty() {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn opener_positions(text: &str) -> impl Iterator<Item = usize> + '_ {
    text.bytes()
        .enumerate()
        .filter(|(_, b)| *b == b'{' || *b == b'[')
        .map(|(i, _)| i)
}

/// Extract the first balanced JSON value embedded in `text`, falling back to
/// parsing the whole (trimmed) string.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    for start in opener_positions(trimmed) {
        let Some(end) = balanced_end(trimmed, start) else {
            continue;
        };
        if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
            return Some(value);
        }
    }
    serde_json::from_str(trimmed).ok()
}

/// A `"` preceded by an odd run of backslashes is inside a string.
fn is_escaped(bytes: &[u8], at: usize) -> bool {
    bytes[..at].iter().rev().take_while(|&&b| b == b'\\').count() % 2 == 1
}

/// Byte index of the bracket opening the region closed at `end`.
///
/// Walks backwards, so the cost is the size of the region rather than of
/// everything printed before it.
pub fn matching_opener(text: &str, end: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if !matches!(bytes.get(end), Some(b'}') | Some(b']')) {
        return None;
    }

    let mut expected: Vec<u8> = Vec::new();
    let mut in_string = false;

    for i in (0..=end).rev() {
        let b = bytes[i];
        if b == b'"' && !is_escaped(bytes, i) {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match b {
            b'}' => expected.push(b'{'),
            b']' => expected.push(b'['),
            b'{' | b'[' => {
                if expected.pop() != Some(b) {
                    return None;
                }
                if expected.is_empty() {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract a JSON object that ends exactly at the end of `text`.
///
/// Used on accumulated child stdout, where a workflow prints its final
/// machine-readable result as the last thing it writes.
pub fn extract_trailing_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    let trimmed = text.trim_end();
    if !trimmed.ends_with('}') {
        return None;
    }
    let start = matching_opener(trimmed, trimmed.len() - 1)?;
    match serde_json::from_str::<Value>(&trimmed[start..]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// The string `status` field of a trailing JSON object, if any.
pub fn trailing_status(text: &str) -> Option<String> {
    extract_trailing_object(text)?
        .get("status")?
        .as_str()
        .map(str::to_string)
}
