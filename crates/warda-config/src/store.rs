//! The persistence boundary of the configuration service.

use async_trait::async_trait;
use warda_db::DbPool;

use crate::db;
use crate::error::{AgentConfigError, StoreError};
use crate::mapping::{merge_update, to_payload, RecordUpdate};
use crate::model::{AgentConfigPatch, AgentConfigPayload, AgentConfigRecord, AgentKey};

/// Reads and writes agent records.
#[async_trait]
pub trait AgentConfigStore: Send + Sync + 'static {
    async fn get_record(&self, key: AgentKey) -> Result<AgentConfigRecord, StoreError>;

    async fn update_record(
        &self,
        agent_id: &str,
        updates: RecordUpdate,
    ) -> Result<AgentConfigRecord, StoreError>;
}

/// The SQLite-backed store. Blocking queries run on the blocking pool.
#[derive(Clone)]
pub struct SqliteAgentStore {
    pool: DbPool,
}

impl SqliteAgentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Provisions `record` if no agent with its id or name exists yet.
    pub async fn insert_if_absent(&self, record: AgentConfigRecord) -> Result<bool, StoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            db::insert_agent_record(&conn, &record)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl AgentConfigStore for SqliteAgentStore {
    async fn get_record(&self, key: AgentKey) -> Result<AgentConfigRecord, StoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            db::get_agent_record(&conn, &key)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    async fn update_record(
        &self,
        agent_id: &str,
        updates: RecordUpdate,
    ) -> Result<AgentConfigRecord, StoreError> {
        let pool = self.pool.clone();
        let agent_id = agent_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            db::update_agent_record(&conn, &agent_id, &updates)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

/// Loads the current configuration in wire shape.
pub async fn get_agent_config<S: AgentConfigStore + ?Sized>(
    store: &S,
    key: AgentKey,
) -> Result<AgentConfigPayload, AgentConfigError> {
    let record = store.get_record(key).await?;
    Ok(to_payload(&record)?)
}

/// Merges `patch` into the stored configuration of `agent_id` and returns
/// the configuration as persisted. A patch that sets no field writes
/// nothing and returns the current configuration.
pub async fn update_agent_config<S: AgentConfigStore + ?Sized>(
    store: &S,
    agent_id: &str,
    patch: &AgentConfigPatch,
) -> Result<AgentConfigPayload, AgentConfigError> {
    let old = get_agent_config(store, AgentKey::Id(agent_id.to_string())).await?;
    if patch.is_empty() {
        tracing::debug!(agent_id, "config patch sets no fields, nothing written");
        return Ok(old);
    }
    let merged = merge_update(&old, patch);
    let updates = RecordUpdate::from_payload(&merged)?;
    let record = store.update_record(agent_id, updates).await?;
    tracing::debug!(agent_id, "agent config updated");
    Ok(to_payload(&record)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warda_db::{open_database, DbRuntimeSettings};

    fn store() -> (tempfile::TempDir, SqliteAgentStore) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("agent.db");
        let pool = open_database(
            path.to_str().expect("utf-8 path"),
            DbRuntimeSettings::default(),
        )
        .expect("database");
        (dir, SqliteAgentStore::new(pool))
    }

    #[tokio::test]
    async fn update_merges_into_the_stored_config() {
        let (_dir, store) = store();
        let record = AgentConfigRecord::new("a1", "Warda").with_system_message("Be kind.");
        assert!(store.insert_if_absent(record).await.expect("insert"));

        let patch = AgentConfigPatch {
            max_tokens: Some(500),
            temperature: Some(0.7),
            ..AgentConfigPatch::for_agent("a1")
        };
        let updated = update_agent_config(&store, "a1", &patch)
            .await
            .expect("update");
        assert_eq!(updated.max_tokens, Some(500));
        assert_eq!(updated.temperature, Some(0.7));
        assert_eq!(updated.top_p, Some(1.0));
        assert_eq!(updated.system_message.as_deref(), Some("Be kind."));

        let reread = get_agent_config(&store, AgentKey::Name("Warda".into()))
            .await
            .expect("read back");
        assert_eq!(reread, updated);
    }

    #[tokio::test]
    async fn empty_patch_leaves_the_row_untouched() {
        let (_dir, store) = store();
        let record = AgentConfigRecord::new("a1", "Warda");
        assert!(store.insert_if_absent(record).await.expect("insert"));
        let key = AgentKey::Id("a1".into());
        let before = store.get_record(key.clone()).await.expect("stored");

        let current = update_agent_config(&store, "a1", &AgentConfigPatch::for_agent("a1"))
            .await
            .expect("no-op update");
        assert_eq!(current.agent_name, "Warda");

        let after = store.get_record(key).await.expect("stored");
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn update_of_unknown_agent_fails_without_writing() {
        let (_dir, store) = store();
        let err = update_agent_config(&store, "ghost", &AgentConfigPatch::for_agent("ghost"))
            .await
            .expect_err("no such agent");
        assert!(matches!(
            err,
            AgentConfigError::Store(StoreError::NotFound(_))
        ));
    }
}
