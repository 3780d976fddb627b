//! Relationship deltas carried in merge (MACRO) summaries.
//!
//! A merge summary may end with a JSON object, bare or in a fenced ```json
//! block:
//!
//! ```text
//! {"relationships": [{"source": "Alice", "target": "Bob", "delta": 2, "tags": ["ally"]}]}
//! ```
//!
//! `triplets` of `{source, relation, target}` are also accepted and count as a
//! delta of 1 tagged with the relation. The JSON is removed from the stored text.

use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::warn;

/// One relationship change found in a merge summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDelta {
    pub source: String,
    pub target: String,
    pub delta: i64,
    pub tags: BTreeSet<String>,
}

/// Merge summary split into narrative text and relationship deltas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutput {
    pub summary: String,
    pub deltas: Vec<RelationshipDelta>,
}

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    relationships: Vec<RawDelta>,
    #[serde(default)]
    triplets: Vec<Triplet>,
}

#[derive(Deserialize)]
struct RawDelta {
    source: String,
    target: String,
    #[serde(default = "unit_delta")]
    delta: i64,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Deserialize)]
struct Triplet {
    source: String,
    relation: String,
    target: String,
}

fn unit_delta() -> i64 {
    1
}

/// Locates the JSON payload: a fenced ```json block, or the whole text when it is an object.
/// Returns the payload and the remaining prose.
fn split_payload(text: &str) -> Option<(&str, String)> {
    if let Some(start) = text.find("```json") {
        let body_start = start + "```json".len();
        let body_len = text[body_start..].find("```")?;
        let body = &text[body_start..body_start + body_len];
        let rest = format!(
            "{}{}",
            &text[..start],
            &text[body_start + body_len + "```".len()..]
        );
        return Some((body.trim(), rest.trim().to_string()));
    }
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some((trimmed, String::new()));
    }
    None
}

fn to_deltas(payload: Payload) -> Vec<RelationshipDelta> {
    let explicit = payload.relationships.into_iter().map(|raw| RelationshipDelta {
        source: raw.source.trim().to_string(),
        target: raw.target.trim().to_string(),
        delta: raw.delta,
        tags: raw.tags.into_iter().filter(|t| !t.trim().is_empty()).collect(),
    });
    let triplets = payload.triplets.into_iter().map(|t| RelationshipDelta {
        source: t.source.trim().to_string(),
        target: t.target.trim().to_string(),
        delta: 1,
        tags: std::iter::once(t.relation.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect(),
    });
    explicit
        .chain(triplets)
        .filter(|d| !d.source.is_empty() && !d.target.is_empty())
        .collect()
}

/// Splits a raw merge summary. Text without a payload, or with a payload that does
/// not parse, is kept whole as the summary.
pub fn parse_merge_output(raw: &str) -> MergeOutput {
    let Some((json, prose)) = split_payload(raw) else {
        return MergeOutput {
            summary: raw.trim().to_string(),
            deltas: Vec::new(),
        };
    };

    match serde_json::from_str::<Payload>(json) {
        Ok(mut payload) => {
            let summary = if prose.is_empty() {
                payload.summary.take().unwrap_or_default().trim().to_string()
            } else {
                prose
            };
            MergeOutput {
                summary,
                deltas: to_deltas(payload),
            }
        }
        Err(e) => {
            warn!(error = %e, "Merge summary carried unparseable relationship JSON");
            MergeOutput {
                summary: raw.trim().to_string(),
                deltas: Vec::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_block_is_stripped() {
        let raw = "The party crossed the river.\n```json\n{\"relationships\": [{\"source\": \"Alice\", \"target\": \"Bob\", \"delta\": -2, \"tags\": [\"rival\"]}]}\n```";
        let out = parse_merge_output(raw);
        assert_eq!(out.summary, "The party crossed the river.");
        assert_eq!(out.deltas.len(), 1);
        assert_eq!(out.deltas[0].delta, -2);
        assert!(out.deltas[0].tags.contains("rival"));
    }

    #[test]
    fn test_bare_object_with_summary_and_triplets() {
        let raw = r#"{"summary": "They met.", "triplets": [{"source": "Alice", "relation": "trusts", "target": "Bob"}]}"#;
        let out = parse_merge_output(raw);
        assert_eq!(out.summary, "They met.");
        assert_eq!(
            out.deltas,
            vec![RelationshipDelta {
                source: "Alice".into(),
                target: "Bob".into(),
                delta: 1,
                tags: ["trusts".to_string()].into_iter().collect(),
            }]
        );
    }

    #[test]
    fn test_plain_text_and_broken_json() {
        assert_eq!(parse_merge_output("  just prose ").summary, "just prose");
        let broken = "Story.\n```json\n{not json}\n```";
        let out = parse_merge_output(broken);
        assert!(out.deltas.is_empty());
        assert_eq!(out.summary, broken);
    }

    #[test]
    fn test_entries_with_blank_entities_are_dropped() {
        let raw = r#"{"summary": "x", "relationships": [{"source": " ", "target": "Bob"}]}"#;
        assert!(parse_merge_output(raw).deltas.is_empty());
    }
}
