//! Semantic deduplication key.
//!
//! Two tasks that mean the same thing must hash the same, regardless of casing,
//! whitespace or the order of their context fields.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::goal::GoalId;

/// Stands in for a missing goal reference so unlinked tasks share one hash space.
pub const GOAL_SENTINEL: &str = "goal:none";

const FIELD_SEPARATOR: u8 = 0x1f;

/// Lowercase, collapse whitespace runs and trim.
pub fn normalize_text(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Derive the deterministic SHA-256 dedup key (64 hex chars) for a task.
pub fn semantic_hash(
    name: &str,
    description: &str,
    goal_id: Option<GoalId>,
    context: &Map<String, Value>,
) -> String {
    let goal = match goal_id {
        Some(id) => format!("goal:{}", id),
        None => GOAL_SENTINEL.to_string(),
    };

    let mut canonical_context = String::new();
    write_canonical_object(context, &mut canonical_context);

    let mut hasher = Sha256::new();
    for field in [
        normalize_text(name),
        normalize_text(description),
        goal,
        canonical_context,
    ] {
        hasher.update(field.as_bytes());
        hasher.update([FIELD_SEPARATOR]);
    }
    hex::encode(hasher.finalize())
}

/// Serialize a JSON value with recursively sorted keys and normalized strings.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_canonical_object(map, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => out.push_str(&Value::String(normalize_text(s)).to_string()),
        other => out.push_str(&other.to_string()),
    }
}

fn write_canonical_object(map: &Map<String, Value>, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        if let Some(value) = map.get(key) {
            write_canonical(value, out);
        }
    }
    out.push('}');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_normalization_collides() {
        let goal = Some(Uuid::new_v4());
        let a = semantic_hash("Find  Leads", "In the EU\n", goal, &Map::new());
        let b = semantic_hash("find leads", "  in the eu", goal, &Map::new());
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_context_key_order_is_irrelevant() {
        let first = ctx(json!({"region": "EU", "limits": {"max": 5, "min": 1}}));
        let second = ctx(json!({"limits": {"min": 1, "max": 5}, "region": "eu"}));
        assert_eq!(
            semantic_hash("t", "d", None, &first),
            semantic_hash("t", "d", None, &second)
        );
    }

    #[test]
    fn test_any_field_change_changes_hash() {
        let goal = Uuid::new_v4();
        let base = semantic_hash("name", "desc", Some(goal), &Map::new());

        assert_ne!(base, semantic_hash("other", "desc", Some(goal), &Map::new()));
        assert_ne!(base, semantic_hash("name", "other", Some(goal), &Map::new()));
        assert_ne!(base, semantic_hash("name", "desc", Some(Uuid::new_v4()), &Map::new()));
        assert_ne!(base, semantic_hash("name", "desc", None, &Map::new()));
        assert_ne!(
            base,
            semantic_hash("name", "desc", Some(goal), &ctx(json!({"k": 1})))
        );
    }

    #[test]
    fn test_field_boundaries_are_framed() {
        assert_ne!(
            semantic_hash("ab", "c", None, &Map::new()),
            semantic_hash("a", "bc", None, &Map::new())
        );
    }
}
