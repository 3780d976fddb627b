//! Human-readable world-state diffs.
//!
//! States are flattened to leaf paths (`player.hp`, `inventory[0]`); each changed
//! leaf becomes one line: `+ path = value`, `- path` or `~ path: old -> new`.

use serde_json::Value;
use std::collections::BTreeMap;

pub const NO_CHANGES: &str = "(no changes)";

fn flatten_into(prefix: &str, value: &Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(&path, child, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, child) in items.iter().enumerate() {
                flatten_into(&format!("{}[{}]", prefix, i), child, out);
            }
        }
        leaf => {
            let path = if prefix.is_empty() { "$" } else { prefix };
            out.insert(path.to_string(), leaf.clone());
        }
    }
}

pub(crate) fn flatten(value: &Value) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    flatten_into("", value, &mut out);
    out
}

/// Diff of `next` against `previous`; with no previous state every leaf is an addition.
pub fn diff_summary(previous: Option<&Value>, next: &Value) -> String {
    let before = previous.map(flatten).unwrap_or_default();
    let after = flatten(next);
    let mut lines = Vec::new();

    for (path, new_value) in &after {
        match before.get(path) {
            None => lines.push(format!("+ {} = {}", path, new_value)),
            Some(old_value) if old_value != new_value => {
                lines.push(format!("~ {}: {} -> {}", path, old_value, new_value))
            }
            Some(_) => {}
        }
    }
    for path in before.keys() {
        if !after.contains_key(path) {
            lines.push(format!("- {}", path));
        }
    }

    if lines.is_empty() {
        NO_CHANGES.to_string()
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_snapshot_lists_every_leaf() {
        let diff = diff_summary(None, &json!({"player": {"hp": 10}, "day": 1}));
        assert_eq!(diff, "+ day = 1\n+ player.hp = 10");
    }

    #[test]
    fn test_changes_additions_and_removals() {
        let before = json!({"hp": 10, "items": ["sword"], "gold": 5});
        let after = json!({"hp": 7, "items": ["sword", "shield"]});
        let diff = diff_summary(Some(&before), &after);
        assert_eq!(
            diff,
            "~ hp: 10 -> 7\n+ items[1] = \"shield\"\n- gold"
        );
    }

    #[test]
    fn test_identical_states() {
        let state = json!({"hp": 10});
        assert_eq!(diff_summary(Some(&state), &state), NO_CHANGES);
    }

    #[test]
    fn test_scalar_root_and_empty_containers() {
        let flat = flatten(&json!({"bag": {}, "list": []}));
        assert_eq!(flat.get("bag"), Some(&json!({})));
        assert_eq!(flat.get("list"), Some(&json!([])));
        assert_eq!(flatten(&json!(3)).get("$"), Some(&json!(3)));
    }
}
