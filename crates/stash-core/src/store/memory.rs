//! In-process revision store

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use super::RevisionStore;
use crate::error::{Error, Result};
use crate::models::{validate_display_name, Document, DocumentId};

/// Revision store kept in memory, for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryRevisionStore {
    documents: Mutex<HashMap<DocumentId, Document>>,
    summaries: Mutex<HashMap<DocumentId, String>>,
}

impl MemoryRevisionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document with an arbitrary revision
    pub fn insert(&self, document: Document) {
        self.lock_documents().insert(document.id, document);
    }

    /// Current summary name of a document
    pub fn summary(&self, id: &DocumentId) -> Option<String> {
        self.lock_summaries().get(id).cloned()
    }

    fn lock_documents(&self) -> std::sync::MutexGuard<'_, HashMap<DocumentId, Document>> {
        self.documents
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_summaries(&self) -> std::sync::MutexGuard<'_, HashMap<DocumentId, String>> {
        self.summaries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl RevisionStore for MemoryRevisionStore {
    async fn create(&self, payload: &Value) -> Result<Document> {
        let document = Document::new(DocumentId::new(), payload.clone(), 1);
        self.insert(document.clone());
        Ok(document)
    }

    async fn read(&self, id: &DocumentId) -> Result<Option<Document>> {
        Ok(self.lock_documents().get(id).cloned())
    }

    async fn update(
        &self,
        id: &DocumentId,
        payload: &Value,
        expected_revision: Option<i64>,
    ) -> Result<Option<i64>> {
        let mut documents = self.lock_documents();
        let Some(document) = documents.get_mut(id) else {
            return Ok(None);
        };
        if expected_revision.is_some_and(|expected| expected != document.revision) {
            return Ok(None);
        }

        document.payload = payload.clone();
        document.revision += 1;
        Ok(Some(document.revision))
    }

    async fn update_summary(&self, id: &DocumentId, name: &str) -> Result<()> {
        let name = validate_display_name(name)?;
        if !self.lock_documents().contains_key(id) {
            return Err(Error::NotFound(id.to_string()));
        }
        self.lock_summaries().insert(*id, name.to_string());
        Ok(())
    }
}
