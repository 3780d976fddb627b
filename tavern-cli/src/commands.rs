//! Command handlers. Each opens the engine on the configured store with offline
//! collaborators: these commands never summarize, so consolidation is only ever deferred.

use crate::cli::Commands;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tavern_generation::Offline;
use tavern_memory::{group_by_category, EngineConfig, SessionCoordinator};
use tavern_storage::{NewRuleFragment, RuleStore, SqliteStore, StoreConfig};
use tracing::info;

/// Reads a JSON array of rule fragments.
pub fn load_rules(path: &Path) -> Result<Vec<NewRuleFragment>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Read rules file {}", path.display()))?;
    let rules: Vec<NewRuleFragment> = serde_json::from_str(&raw)
        .with_context(|| format!("Parse rules file {} as a JSON array", path.display()))?;
    for (i, rule) in rules.iter().enumerate() {
        if rule.content.trim().is_empty() || rule.category.trim().is_empty() {
            anyhow::bail!("Rule #{} in {} needs content and category", i, path.display());
        }
    }
    Ok(rules)
}

fn read_state(path: Option<&Path>) -> Result<serde_json::Value> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Read state file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Parse state file {} as JSON", path.display()))
        }
        None => Ok(serde_json::json!({})),
    }
}

pub async fn run(command: Commands, store_config: StoreConfig) -> Result<()> {
    let store = Arc::new(
        SqliteStore::new(&store_config)
            .await
            .with_context(|| format!("Open database {}", store_config.database_url))?,
    );
    let engine_config = EngineConfig::from_env().context("Load engine config from environment")?;
    let engine = SessionCoordinator::new(
        store.clone(),
        Arc::new(Offline),
        Arc::new(Offline),
        engine_config,
    );

    match command {
        Commands::Init => {
            info!(database_url = %store_config.database_url, "Schema ready");
            println!("Initialized {}", store_config.database_url);
        }
        Commands::Create { label, state } => {
            let initial = read_state(state.as_deref())?;
            let conversation = engine.create_conversation(&label, initial).await?;
            println!("{}", conversation.id);
        }
        Commands::List => {
            for c in engine.list_conversations().await? {
                println!("{}\t{}\t{}", c.id, c.created_at.to_rfc3339(), c.label);
            }
        }
        Commands::Delete { conversation } => {
            if engine.delete_conversation(&conversation).await? {
                println!("Deleted {}", conversation);
            } else {
                anyhow::bail!("Conversation {} not found", conversation);
            }
        }
        Commands::State { conversation } => {
            let state = engine.get_current_state(&conversation).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Commands::History {
            conversation,
            page,
            page_size,
        } => {
            for m in engine.history(&conversation, page, page_size).await? {
                let mark = if m.summarized { "*" } else { " " };
                println!("{}{:>5} [{}] {}", mark, m.seq, m.role, m.content);
            }
        }
        Commands::Timeline { conversation, from, to } => {
            let nodes = engine
                .get_memory_timeline(&conversation, from.as_deref(), to.as_deref())
                .await?;
            for n in nodes {
                println!(
                    "[{}|{}] seq {}-{}{} {}",
                    n.tier,
                    n.timeline_anchor,
                    n.first_seq,
                    n.last_seq,
                    if n.folded { " (folded)" } else { "" },
                    n.summary
                );
            }
        }
        Commands::Spine { conversation } => {
            println!("{}", engine.memory_spine(&conversation).await?);
        }
        Commands::Rollback {
            conversation,
            message,
        } => {
            let state = engine.rollback_to(&conversation, message).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Commands::Truncate {
            conversation,
            message,
        } => {
            let state = engine
                .truncate_after(&conversation, message)
                .await
                .with_context(|| format!("Truncate {} after message {}", conversation, message))?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Commands::Rules { scope, tags } => {
            let tags: BTreeSet<String> = tags.into_iter().collect();
            let rules = engine.resolve_rules(&scope, &tags).await?;
            for (category, group) in group_by_category(&rules) {
                println!("## {}", category);
                for rule in group {
                    println!("- ({}) {}", rule.id, rule.content);
                }
            }
        }
        Commands::Relationships {
            conversation,
            entity,
            limit,
        } => {
            for e in engine.get_relationships(&conversation, &entity, limit).await? {
                let tags: Vec<&str> = e.tags.iter().map(String::as_str).collect();
                println!("{} -> {}\t{:+}\t[{}]", e.source, e.target, e.value, tags.join(", "));
            }
        }
        Commands::ImportRules { file } => {
            let rules = load_rules(&file)?;
            let inserted = store
                .insert_rule_fragments(&rules)
                .await
                .with_context(|| format!("Import rules from {}; nothing was imported", file.display()))?;
            println!("Imported {} rule fragments", inserted.len());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_rules_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"content": "Speak plainly.", "category": "style", "scope_type": "GLOBAL", "required_tags": ["dialogue"]}}]"#
        )
        .unwrap();

        let rules = load_rules(file.path()).unwrap();
        assert_eq!(rules.len(), 1);
        assert!(rules[0].active);
        assert!(rules[0].required_tags.contains("dialogue"));
        assert_eq!(rules[0].scope_value, None);
    }

    #[test]
    fn test_load_rules_rejects_blank_category() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"content": "x", "category": " ", "scope_type": "CHARACTER", "scope_value": "Bob"}}]"#
        )
        .unwrap();
        assert!(load_rules(file.path()).is_err());
    }

    #[tokio::test]
    async fn test_import_and_resolve_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("cli.db");
        let rules_path = dir.path().join("rules.json");
        std::fs::write(
            &rules_path,
            r#"[{"content": "Stay in character.", "category": "persona", "scope_type": "CHARACTER", "scope_value": "Alice"}]"#,
        )
        .unwrap();
        let config = StoreConfig::new(db.to_str().unwrap());

        run(Commands::ImportRules { file: rules_path }, config.clone()).await.unwrap();

        let store = SqliteStore::new(&config).await.unwrap();
        let rules = store.candidate_rules("Alice").await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].category, "persona");
    }

    #[tokio::test]
    async fn test_import_rules_rolls_back_on_invalid_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("cli.db");
        let rules_path = dir.path().join("rules.json");
        std::fs::write(
            &rules_path,
            r#"[
                {"content": "Keep it short.", "category": "style", "scope_type": "GLOBAL"},
                {"content": "Growl.", "category": "persona", "scope_type": "CHARACTER"}
            ]"#,
        )
        .unwrap();
        let config = StoreConfig::new(db.to_str().unwrap());

        let result = run(Commands::ImportRules { file: rules_path }, config.clone()).await;
        assert!(result.is_err());

        let store = SqliteStore::new(&config).await.unwrap();
        assert!(store.candidate_rules("anyone").await.unwrap().is_empty());
    }
}
