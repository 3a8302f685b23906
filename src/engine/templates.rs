// Workflow template lookup

//! Workflow templates live in the control plane's database, versioned per
//! namespace + UID. [`PgTemplateStore`] reads them from Postgres;
//! [`InMemoryTemplateStore`] serves development and tests.

use std::collections::HashMap;

use sqlx::{PgPool, Row};
use tokio::sync::RwLock;

use crate::models::WorkflowTemplate;
use crate::Result;

/// Read access to stored workflow templates
#[async_trait::async_trait]
pub trait TemplateStore: Send + Sync {
    /// Template `uid` at `version` in `namespace`
    ///
    /// Version 0 selects the latest version.
    async fn get_workflow_template(
        &self,
        namespace: &str,
        uid: &str,
        version: i32,
    ) -> Result<Option<WorkflowTemplate>>;
}

/// Postgres-backed template store
#[derive(Clone)]
pub struct PgTemplateStore {
    pool: PgPool,
}

impl PgTemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPool::connect(dsn).await?;
        Ok(Self::new(pool))
    }
}

const SELECT_TEMPLATE: &str = "SELECT wt.uid, wt.name, wtv.version, wtv.manifest \
     FROM workflow_template_versions wtv \
     JOIN workflow_templates wt ON wt.id = wtv.workflow_template_id \
     WHERE wt.namespace = $1 AND wt.uid = $2 AND wt.is_archived = false";

#[async_trait::async_trait]
impl TemplateStore for PgTemplateStore {
    async fn get_workflow_template(
        &self,
        namespace: &str,
        uid: &str,
        version: i32,
    ) -> Result<Option<WorkflowTemplate>> {
        let sql = if version == 0 {
            format!("{} ORDER BY wtv.version DESC LIMIT 1", SELECT_TEMPLATE)
        } else {
            format!("{} AND wtv.version = $3", SELECT_TEMPLATE)
        };
        let mut query = sqlx::query(&sql).bind(namespace).bind(uid);
        if version != 0 {
            query = query.bind(version);
        }
        let row = query.fetch_optional(&self.pool).await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(WorkflowTemplate {
            uid: row.try_get("uid")?,
            name: row.try_get("name")?,
            version: row.try_get("version")?,
            manifest: row.try_get("manifest")?,
        }))
    }
}

/// In-memory template store
#[derive(Default)]
pub struct InMemoryTemplateStore {
    templates: RwLock<HashMap<(String, String), Vec<WorkflowTemplate>>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a template version under `namespace`
    pub async fn insert(&self, namespace: &str, template: WorkflowTemplate) {
        let mut templates = self.templates.write().await;
        let versions = templates
            .entry((namespace.to_string(), template.uid.clone()))
            .or_default();
        versions.retain(|existing| existing.version != template.version);
        versions.push(template);
        versions.sort_by_key(|t| t.version);
    }
}

#[async_trait::async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn get_workflow_template(
        &self,
        namespace: &str,
        uid: &str,
        version: i32,
    ) -> Result<Option<WorkflowTemplate>> {
        let templates = self.templates.read().await;
        let Some(versions) = templates.get(&(namespace.to_string(), uid.to_string())) else {
            return Ok(None);
        };
        let found = if version == 0 {
            versions.last()
        } else {
            versions.iter().find(|t| t.version == version)
        };
        Ok(found.cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(version: i32) -> WorkflowTemplate {
        WorkflowTemplate {
            uid: "tpl-1".to_string(),
            name: "Train Model".to_string(),
            version,
            manifest: format!("# v{}", version),
        }
    }

    #[tokio::test]
    async fn test_lookup_by_version() {
        let store = InMemoryTemplateStore::new();
        store.insert("team-a", template(1)).await;
        store.insert("team-a", template(2)).await;

        let found = store.get_workflow_template("team-a", "tpl-1", 1).await.unwrap();
        assert_eq!(found.unwrap().manifest, "# v1");

        let latest = store.get_workflow_template("team-a", "tpl-1", 0).await.unwrap();
        assert_eq!(latest.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_lookup_is_namespaced() {
        let store = InMemoryTemplateStore::new();
        store.insert("team-a", template(1)).await;

        assert!(store
            .get_workflow_template("team-b", "tpl-1", 1)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_workflow_template("team-a", "tpl-1", 3)
            .await
            .unwrap()
            .is_none());
    }
}
