//! Content sufficiency checks for task payloads.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::task::TaskPayload;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\[(?:placeholder|todo|tbd)\]|\[insert[^\]]*\]|\{\{[^}]*\}\}|lorem ipsum|\btbd\b|\bn/a\b|\.\.\.",
    )
    .unwrap()
});

/// Payload is large enough and carries something beyond placeholder markers.
pub fn is_substantial(payload: &TaskPayload, min_chars: usize) -> bool {
    !payload.is_empty() && payload.serialized_len() > min_chars && !is_placeholder_only(payload)
}

/// True when nothing alphanumeric survives once placeholder markers are removed.
pub fn is_placeholder_only(payload: &TaskPayload) -> bool {
    let text = match payload {
        TaskPayload::Absent => return true,
        TaskPayload::Text(text) => text.clone(),
        TaskPayload::Structured(map) => {
            let mut leaves = Vec::new();
            for value in map.values() {
                collect_leaves(value, &mut leaves);
            }
            leaves.join(" ")
        }
    };

    let stripped = PLACEHOLDER_RE.replace_all(&text, " ");
    !stripped.chars().any(char::is_alphanumeric)
}

/// String and number leaves; object keys are structure, not content.
fn collect_leaves(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Array(items) => items.iter().for_each(|v| collect_leaves(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_leaves(v, out)),
        Value::Bool(_) | Value::Null => {}
    }
}
