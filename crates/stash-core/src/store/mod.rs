//! Remote document store abstraction.
//!
//! A `RevisionStore` is the authority for committed revisions. Updates carry
//! an optional revision predicate; a predicate that matches zero rows is
//! reported as `Ok(None)`, never as an error, so callers can tell conflicts
//! apart from transport failures.

mod http;
mod memory;
mod sqlite;

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::models::{Document, DocumentId};

pub use http::HttpRevisionStore;
pub use memory::MemoryRevisionStore;
pub use sqlite::SqliteRevisionStore;

/// Remote document store with compare-and-swap updates
pub trait RevisionStore: Send + Sync + 'static {
    /// Create a document; the store assigns its id and revision 1
    fn create(&self, payload: &Value) -> impl Future<Output = Result<Document>> + Send;

    /// Read the committed document
    fn read(&self, id: &DocumentId) -> impl Future<Output = Result<Option<Document>>> + Send;

    /// Update a document.
    ///
    /// With `Some(expected)` the write only applies when the stored revision
    /// equals `expected`; with `None` it is unconditional. Returns the new
    /// revision, or `None` when zero rows matched.
    fn update(
        &self,
        id: &DocumentId,
        payload: &Value,
        expected_revision: Option<i64>,
    ) -> impl Future<Output = Result<Option<i64>>> + Send;

    /// Write the display name to the denormalized summary record
    fn update_summary(
        &self,
        id: &DocumentId,
        name: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl<S: RevisionStore> RevisionStore for Arc<S> {
    fn create(&self, payload: &Value) -> impl Future<Output = Result<Document>> + Send {
        (**self).create(payload)
    }

    fn read(&self, id: &DocumentId) -> impl Future<Output = Result<Option<Document>>> + Send {
        (**self).read(id)
    }

    fn update(
        &self,
        id: &DocumentId,
        payload: &Value,
        expected_revision: Option<i64>,
    ) -> impl Future<Output = Result<Option<i64>>> + Send {
        (**self).update(id, payload, expected_revision)
    }

    fn update_summary(
        &self,
        id: &DocumentId,
        name: &str,
    ) -> impl Future<Output = Result<()>> + Send {
        (**self).update_summary(id, name)
    }
}
