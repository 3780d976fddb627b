//! Rule resolution by scope and tags.
//!
//! Rules are a global registry maintained outside the engine. Resolution is a
//! pure read and never blocks the conversation write path.

use crate::error::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tavern_storage::{RuleFragment, Store};

#[derive(Clone)]
pub struct RuleResolver {
    store: Arc<dyn Store>,
}

impl RuleResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Active GLOBAL fragments plus CHARACTER fragments bound to `scope_value`, keeping
    /// only those whose required tags are all present in `tags`. Ordered by category, then id.
    ///
    /// No match is an empty result, not an error.
    pub async fn resolve(
        &self,
        scope_value: &str,
        tags: &BTreeSet<String>,
    ) -> Result<Vec<RuleFragment>> {
        let candidates = self.store.candidate_rules(scope_value).await?;
        Ok(filter_by_tags(candidates, tags))
    }
}

fn filter_by_tags(candidates: Vec<RuleFragment>, tags: &BTreeSet<String>) -> Vec<RuleFragment> {
    let mut matched: Vec<RuleFragment> = candidates
        .into_iter()
        .filter(|rule| rule.active && rule.required_tags.is_subset(tags))
        .collect();
    matched.sort_by(|a, b| a.category.cmp(&b.category).then(a.id.cmp(&b.id)));
    matched
}

/// Groups resolved fragments by category for caller-side prioritisation.
pub fn group_by_category(rules: &[RuleFragment]) -> BTreeMap<String, Vec<RuleFragment>> {
    let mut groups: BTreeMap<String, Vec<RuleFragment>> = BTreeMap::new();
    for rule in rules {
        groups.entry(rule.category.clone()).or_default().push(rule.clone());
    }
    groups
}
