use super::{from_json, to_json, SqliteStore};
use crate::error::{Result, StorageError};
use crate::models::{NewRuleFragment, RuleFragment, ScopeType};
use crate::store::RuleStore;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::info;

fn row_to_rule(row: &SqliteRow) -> Result<RuleFragment> {
    let scope_type: String = row.try_get("scope_type")?;
    let required_tags: String = row.try_get("required_tags")?;
    Ok(RuleFragment {
        id: row.try_get("id")?,
        content: row.try_get("content")?,
        raw_content: row.try_get("raw_content")?,
        category: row.try_get("category")?,
        scope_type: scope_type.parse()?,
        scope_value: row.try_get("scope_value")?,
        required_tags: from_json(&required_tags)?,
        summary: row.try_get("summary")?,
        source: row.try_get("source")?,
        active: row.try_get("is_active")?,
    })
}

/// A CHARACTER rule without a scope value could never be resolved.
fn check_rule(rule: &NewRuleFragment) -> Result<()> {
    if rule.content.trim().is_empty() || rule.category.trim().is_empty() {
        return Err(StorageError::InvalidValue("rule fragment needs content and category".to_string()));
    }
    if rule.scope_type == ScopeType::Character
        && rule.scope_value.as_deref().map_or(true, |v| v.trim().is_empty())
    {
        return Err(StorageError::InvalidValue(format!(
            "CHARACTER rule '{}' has no scope value",
            rule.category
        )));
    }
    Ok(())
}

async fn insert_rule(conn: &mut SqliteConnection, rule: &NewRuleFragment) -> Result<RuleFragment> {
    check_rule(rule)?;
    let raw_content = rule.raw_content.as_deref().unwrap_or(&rule.content);
    let result = sqlx::query(
        r#"
        INSERT INTO rule_fragments
            (content, raw_content, category, scope_type, scope_value, required_tags, summary, source, is_active)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&rule.content)
    .bind(raw_content)
    .bind(&rule.category)
    .bind(rule.scope_type.as_str())
    .bind(&rule.scope_value)
    .bind(to_json(&rule.required_tags)?)
    .bind(&rule.summary)
    .bind(&rule.source)
    .bind(rule.active)
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query("SELECT * FROM rule_fragments WHERE id = ?")
        .bind(result.last_insert_rowid())
        .fetch_one(&mut *conn)
        .await?;
    row_to_rule(&row)
}

#[async_trait]
impl RuleStore for SqliteStore {
    async fn insert_rule_fragment(&self, rule: &NewRuleFragment) -> Result<RuleFragment> {
        let mut conn = self.pool().acquire().await?;
        let inserted = insert_rule(&mut *conn, rule).await?;
        info!(
            rule_id = inserted.id,
            category = %inserted.category,
            scope = %inserted.scope_type,
            "Rule fragment registered"
        );
        Ok(inserted)
    }

    async fn insert_rule_fragments(&self, rules: &[NewRuleFragment]) -> Result<Vec<RuleFragment>> {
        let mut tx = self.pool().begin().await?;
        let mut inserted = Vec::with_capacity(rules.len());
        for rule in rules {
            inserted.push(insert_rule(&mut *tx, rule).await?);
        }
        tx.commit().await?;
        info!(count = inserted.len(), "Rule fragments registered");
        Ok(inserted)
    }

    async fn set_rule_active(&self, rule_id: i64, active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE rule_fragments SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(rule_id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("rule fragment {}", rule_id)));
        }
        Ok(())
    }

    async fn candidate_rules(&self, scope_value: &str) -> Result<Vec<RuleFragment>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM rule_fragments
            WHERE is_active = 1
              AND (scope_type = 'GLOBAL' OR (scope_type = 'CHARACTER' AND scope_value = ?))
            ORDER BY category, id
            "#,
        )
        .bind(scope_value)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_rule).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::temp_store;
    use super::*;

    fn rule(category: &str, scope_type: ScopeType, scope_value: Option<&str>) -> NewRuleFragment {
        NewRuleFragment {
            content: format!("{} rule", category),
            raw_content: None,
            category: category.to_string(),
            scope_type,
            scope_value: scope_value.map(str::to_string),
            required_tags: Default::default(),
            summary: String::new(),
            source: "test".to_string(),
            active: true,
        }
    }

    #[tokio::test]
    async fn test_candidates_filter_scope_and_activity() {
        let (store, _dir) = temp_store().await;
        let global = store.insert_rule_fragment(&rule("tone", ScopeType::Global, None)).await.unwrap();
        store
            .insert_rule_fragment(&rule("combat", ScopeType::Character, Some("Alice")))
            .await
            .unwrap();
        store
            .insert_rule_fragment(&rule("combat", ScopeType::Character, Some("Bob")))
            .await
            .unwrap();
        let inactive = store.insert_rule_fragment(&rule("magic", ScopeType::Global, None)).await.unwrap();
        store.set_rule_active(inactive.id, false).await.unwrap();

        let candidates = store.candidate_rules("Alice").await.unwrap();
        let categories: Vec<&str> = candidates.iter().map(|r| r.category.as_str()).collect();
        assert_eq!(categories, vec!["combat", "tone"]);
        assert_eq!(global.raw_content, "tone rule");
    }

    #[tokio::test]
    async fn test_set_active_on_unknown_rule() {
        let (store, _dir) = temp_store().await;
        let err = store.set_rule_active(42, true).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_batch_insert_is_all_or_nothing() {
        let (store, _dir) = temp_store().await;
        let batch = vec![
            rule("tone", ScopeType::Global, None),
            rule("persona", ScopeType::Character, None),
        ];
        let err = store.insert_rule_fragments(&batch).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidValue(_)));
        assert!(store.candidate_rules("Alice").await.unwrap().is_empty());

        let batch = vec![
            rule("tone", ScopeType::Global, None),
            rule("persona", ScopeType::Character, Some("Alice")),
        ];
        let inserted = store.insert_rule_fragments(&batch).await.unwrap();
        assert_eq!(inserted.len(), 2);
        assert_eq!(store.candidate_rules("Alice").await.unwrap().len(), 2);
    }
}
