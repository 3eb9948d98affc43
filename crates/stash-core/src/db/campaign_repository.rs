//! Revision-checked campaign repository
//!
//! Backs the remote document store: every committed write bumps `revision`
//! by exactly one inside the same statement that checks the predicate.

use crate::error::{Error, Result};
use crate::models::{validate_display_name, CampaignSummary, Document, DocumentId};
use libsql::{params, Connection};
use serde_json::Value;

/// Trait for campaign storage operations (async)
#[allow(async_fn_in_trait)]
pub trait CampaignRepository {
    /// Create a campaign at revision 1
    async fn create(&self, id: &DocumentId, payload: &Value) -> Result<Document>;

    /// Get a campaign by ID
    async fn get(&self, id: &DocumentId) -> Result<Option<Document>>;

    /// Write `payload` only if the stored revision equals `expected_revision`.
    ///
    /// Returns the new revision, or `None` when zero rows matched.
    async fn compare_and_swap(
        &self,
        id: &DocumentId,
        payload: &Value,
        expected_revision: i64,
    ) -> Result<Option<i64>>;

    /// Write `payload` regardless of the stored revision.
    ///
    /// Returns the new revision, or `None` when the campaign does not exist.
    async fn overwrite(&self, id: &DocumentId, payload: &Value) -> Result<Option<i64>>;

    /// Insert or update the denormalized summary record
    async fn upsert_summary(&self, id: &DocumentId, name: &str) -> Result<()>;

    /// Get the summary record of a campaign
    async fn get_summary(&self, id: &DocumentId) -> Result<Option<CampaignSummary>>;
}

/// libSQL implementation of `CampaignRepository`
pub struct LibSqlCampaignRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlCampaignRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn first_revision(mut rows: libsql::Rows) -> Result<Option<i64>> {
        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}

fn parse_id(raw: &str) -> Result<DocumentId> {
    raw.parse()
        .map_err(|_| Error::Database(format!("Invalid campaign ID: {raw}")))
}

impl CampaignRepository for LibSqlCampaignRepository<'_> {
    async fn create(&self, id: &DocumentId, payload: &Value) -> Result<Document> {
        let now = chrono::Utc::now().timestamp_millis();
        let encoded = serde_json::to_string(payload)?;

        self.conn
            .execute(
                "INSERT INTO campaigns (id, payload, revision, created_at, updated_at)
                 VALUES (?, ?, 1, ?, ?)",
                params![id.as_str(), encoded, now, now],
            )
            .await?;

        Ok(Document::new(*id, payload.clone(), 1))
    }

    async fn get(&self, id: &DocumentId) -> Result<Option<Document>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, payload, revision FROM campaigns WHERE id = ?",
                [id.as_str()],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let raw_id: String = row.get(0)?;
        let payload: String = row.get(1)?;
        Ok(Some(Document {
            id: parse_id(&raw_id)?,
            payload: serde_json::from_str(&payload)?,
            revision: row.get(2)?,
        }))
    }

    async fn compare_and_swap(
        &self,
        id: &DocumentId,
        payload: &Value,
        expected_revision: i64,
    ) -> Result<Option<i64>> {
        let now = chrono::Utc::now().timestamp_millis();
        let encoded = serde_json::to_string(payload)?;

        let rows = self
            .conn
            .query(
                "UPDATE campaigns
                 SET payload = ?, revision = revision + 1, updated_at = ?
                 WHERE id = ? AND revision = ?
                 RETURNING revision",
                params![encoded, now, id.as_str(), expected_revision],
            )
            .await?;

        Self::first_revision(rows).await
    }

    async fn overwrite(&self, id: &DocumentId, payload: &Value) -> Result<Option<i64>> {
        let now = chrono::Utc::now().timestamp_millis();
        let encoded = serde_json::to_string(payload)?;

        let rows = self
            .conn
            .query(
                "UPDATE campaigns
                 SET payload = ?, revision = revision + 1, updated_at = ?
                 WHERE id = ?
                 RETURNING revision",
                params![encoded, now, id.as_str()],
            )
            .await?;

        Self::first_revision(rows).await
    }

    async fn upsert_summary(&self, id: &DocumentId, name: &str) -> Result<()> {
        let name = validate_display_name(name)?;
        let now = chrono::Utc::now().timestamp_millis();

        self.conn
            .execute(
                "INSERT INTO campaign_summaries (id, name, updated_at) VALUES (?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, updated_at = excluded.updated_at",
                params![id.as_str(), name, now],
            )
            .await?;
        Ok(())
    }

    async fn get_summary(&self, id: &DocumentId) -> Result<Option<CampaignSummary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, updated_at FROM campaign_summaries WHERE id = ?",
                [id.as_str()],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let raw_id: String = row.get(0)?;
        Ok(Some(CampaignSummary {
            id: parse_id(&raw_id)?,
            name: row.get(1)?,
            updated_at: row.get(2)?,
        }))
    }
}
