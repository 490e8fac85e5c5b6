use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use super::{require_id, StoreFilter, TestObjectStore};
use crate::error::{IngestError, IngestResult};
use crate::models::TestObject;

/// Store kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<DashMap<String, TestObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TestObjectStore for MemoryStore {
    async fn add(&self, object: &TestObject) -> IngestResult<()> {
        let id = require_id(object)?.to_string();
        self.objects.insert(id, object.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> IngestResult<TestObject> {
        self.objects
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| IngestError::NotFound { id: id.to_string() })
    }

    async fn get_all(&self, filter: StoreFilter) -> IngestResult<Vec<TestObject>> {
        let mut objects: Vec<TestObject> = self
            .objects
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        objects.sort_by(|a, b| a.id().cmp(&b.id()));
        Ok(filter.apply(objects.into_iter()))
    }

    async fn delete(&self, id: &str) -> IngestResult<()> {
        self.objects
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| IngestError::NotFound { id: id.to_string() })
    }

    async fn exists(&self, id: &str) -> IngestResult<bool> {
        Ok(self.objects.contains_key(id))
    }

    async fn get_temporary_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> IngestResult<Vec<TestObject>> {
        let mut objects: Vec<TestObject> = self
            .objects
            .iter()
            .filter(|entry| {
                let object = entry.value();
                object.is_temporary()
                    && object.creation_date.map(|d| d <= cutoff).unwrap_or(false)
            })
            .map(|entry| entry.value().clone())
            .collect();
        objects.sort_by(|a, b| a.id().cmp(&b.id()));
        Ok(objects)
    }
}
