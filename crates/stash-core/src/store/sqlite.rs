//! Revision store over a local libSQL database

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use super::RevisionStore;
use crate::db::{CampaignRepository, Database, LibSqlCampaignRepository};
use crate::error::Result;
use crate::models::{CampaignSummary, Document, DocumentId};

/// Revision store backed by the `campaigns` table.
///
/// Used by `stash-api` as its storage engine and by embedded setups.
#[derive(Clone)]
pub struct SqliteRevisionStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteRevisionStore {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::new(Arc::new(Mutex::new(db))))
    }

    /// Read the summary record of a campaign
    pub async fn summary(&self, id: &DocumentId) -> Result<Option<CampaignSummary>> {
        let db = self.db.lock().await;
        LibSqlCampaignRepository::new(db.connection())
            .get_summary(id)
            .await
    }
}

impl RevisionStore for SqliteRevisionStore {
    async fn create(&self, payload: &Value) -> Result<Document> {
        let db = self.db.lock().await;
        LibSqlCampaignRepository::new(db.connection())
            .create(&DocumentId::new(), payload)
            .await
    }

    async fn read(&self, id: &DocumentId) -> Result<Option<Document>> {
        let db = self.db.lock().await;
        LibSqlCampaignRepository::new(db.connection()).get(id).await
    }

    async fn update(
        &self,
        id: &DocumentId,
        payload: &Value,
        expected_revision: Option<i64>,
    ) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        let repo = LibSqlCampaignRepository::new(db.connection());
        match expected_revision {
            Some(expected) => repo.compare_and_swap(id, payload, expected).await,
            None => repo.overwrite(id, payload).await,
        }
    }

    async fn update_summary(&self, id: &DocumentId, name: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlCampaignRepository::new(db.connection())
            .upsert_summary(id, name)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn sqlite_store_routes_predicate_to_compare_and_swap() {
        let store = SqliteRevisionStore::open_in_memory().await.unwrap();
        let document = store.create(&json!({"name": "A"})).await.unwrap();

        assert_eq!(
            store.update(&document.id, &json!({}), Some(7)).await.unwrap(),
            None
        );
        assert_eq!(
            store.update(&document.id, &json!({}), Some(1)).await.unwrap(),
            Some(2)
        );
        assert_eq!(
            store.update(&document.id, &json!({}), None).await.unwrap(),
            Some(3)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sqlite_store_exposes_summary() {
        let store = SqliteRevisionStore::open_in_memory().await.unwrap();
        let document = store.create(&json!({})).await.unwrap();

        store.update_summary(&document.id, "Fall").await.unwrap();
        let summary = store.summary(&document.id).await.unwrap().unwrap();
        assert_eq!(summary.name, "Fall");
    }
}
