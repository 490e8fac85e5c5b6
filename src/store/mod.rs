//! Durable storage for persisted Test Objects

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::IngestResult;
use crate::models::TestObject;

/// Paging for `get_all`; a `limit` of 0 means no limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreFilter {
    pub offset: usize,
    pub limit: usize,
}

impl StoreFilter {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    fn apply<T>(&self, items: impl Iterator<Item = T>) -> Vec<T> {
        let skipped = items.skip(self.offset);
        if self.limit == 0 {
            skipped.collect()
        } else {
            skipped.take(self.limit).collect()
        }
    }
}

/// Backing store for persisted objects.
///
/// Objects are listed in id order. Objects without an id are rejected.
#[async_trait]
pub trait TestObjectStore: Send + Sync {
    /// Insert or replace an object.
    async fn add(&self, object: &TestObject) -> IngestResult<()>;

    /// Fails with `NotFound` for unknown ids.
    async fn get_by_id(&self, id: &str) -> IngestResult<TestObject>;

    async fn get_all(&self, filter: StoreFilter) -> IngestResult<Vec<TestObject>>;

    /// Fails with `NotFound` for unknown ids.
    async fn delete(&self, id: &str) -> IngestResult<()>;

    async fn exists(&self, id: &str) -> IngestResult<bool>;

    /// Temporary objects created at or before `cutoff`, in id order.
    /// Objects without creation date are never returned.
    async fn get_temporary_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> IngestResult<Vec<TestObject>>;
}

fn require_id(object: &TestObject) -> IngestResult<&str> {
    object
        .id()
        .ok_or_else(|| crate::error::IngestError::Storage("Cannot store object without id".to_string()))
}
