use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use super::{require_id, StoreFilter, TestObjectStore};
use crate::error::{IngestError, IngestResult};
use crate::models::TestObject;

/// Test Object store persisted to SQLite.
///
/// Objects are kept as JSON bodies keyed by id; the temporary flag and the
/// creation date are duplicated into indexed columns for
/// [`get_temporary_created_before`](TestObjectStore::get_temporary_created_before).
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub async fn open(path: &Path) -> IngestResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Database living only as long as the store.
    pub async fn in_memory() -> IngestResult<Self> {
        // Every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> IngestResult<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS test_objects (
                id TEXT PRIMARY KEY,
                temporary INTEGER NOT NULL,
                creation_date TEXT,
                body TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_temporary ON test_objects(temporary, creation_date)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    fn row_to_object(row: sqlx::sqlite::SqliteRow) -> IngestResult<TestObject> {
        let body: String = row.try_get(0)?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl TestObjectStore for SqliteStore {
    async fn add(&self, object: &TestObject) -> IngestResult<()> {
        let id = require_id(object)?;
        let body = serde_json::to_string(object)?;
        let creation_date = object.creation_date.map(sortable_date);

        sqlx::query(
            "INSERT OR REPLACE INTO test_objects (id, temporary, creation_date, body)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(object.is_temporary())
        .bind(creation_date)
        .bind(&body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> IngestResult<TestObject> {
        let row = sqlx::query("SELECT body FROM test_objects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| IngestError::NotFound { id: id.to_string() })?;
        Self::row_to_object(row)
    }

    async fn get_all(&self, filter: StoreFilter) -> IngestResult<Vec<TestObject>> {
        // LIMIT -1 means no limit in SQLite
        let limit = if filter.limit == 0 {
            -1
        } else {
            filter.limit as i64
        };
        let rows = sqlx::query("SELECT body FROM test_objects ORDER BY id LIMIT $1 OFFSET $2")
            .bind(limit)
            .bind(filter.offset as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_object).collect()
    }

    async fn delete(&self, id: &str) -> IngestResult<()> {
        let result = sqlx::query("DELETE FROM test_objects WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(IngestError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn exists(&self, id: &str) -> IngestResult<bool> {
        let row = sqlx::query("SELECT 1 FROM test_objects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn get_temporary_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> IngestResult<Vec<TestObject>> {
        let rows = sqlx::query(
            "SELECT body FROM test_objects
             WHERE temporary = 1 AND creation_date IS NOT NULL AND creation_date <= $1
             ORDER BY id",
        )
        .bind(sortable_date(cutoff))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_object).collect()
    }
}

/// Fixed width UTC timestamp, so that text order is time order.
fn sortable_date(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResourceUri, PROP_TEMPORARY};
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_add_and_retrieve() {
        let store = SqliteStore::in_memory().await.unwrap();

        let mut object = TestObject::with_id("EID1");
        object.label = "Roads".to_string();
        object.creation_date = Some(Utc::now());
        object.set_property(PROP_TEMPORARY, "true");
        object.add_resource("upload.0", ResourceUri::parse("/srv/etf/EID1/upload.0").unwrap());
        store.add(&object).await.unwrap();

        let loaded = store.get_by_id("EID1").await.unwrap();
        assert_eq!(loaded, object);
        assert!(store.exists("EID1").await.unwrap());
        assert!(!store.exists("EID2").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_replaces() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut object = TestObject::with_id("EID1");
        store.add(&object).await.unwrap();

        object.label = "Updated".to_string();
        store.add(&object).await.unwrap();

        let all = store.get_all(StoreFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].label, "Updated");
    }

    #[tokio::test]
    async fn test_paging_and_delete() {
        let store = SqliteStore::in_memory().await.unwrap();
        for id in ["EID3", "EID1", "EID2"] {
            store.add(&TestObject::with_id(id)).await.unwrap();
        }

        let page = store.get_all(StoreFilter::new(1, 1)).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id(), Some("EID2"));

        store.delete("EID2").await.unwrap();
        let err = store.delete("EID2").await.unwrap_err();
        assert_eq!(err.status(), 404);
        assert_eq!(store.get_all(StoreFilter::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_temporary_created_before() {
        let store = SqliteStore::in_memory().await.unwrap();
        let cutoff = Utc.with_ymd_and_hms(2025, 4, 2, 10, 0, 0).unwrap();

        let mut at_cutoff = TestObject::with_id("EID-a");
        at_cutoff.creation_date = Some(cutoff);
        at_cutoff.set_property(PROP_TEMPORARY, "true");

        // Sub-second precision must not break the ordering
        let mut just_after = TestObject::with_id("EID-b");
        just_after.creation_date = Some(cutoff + Duration::milliseconds(500));
        just_after.set_property(PROP_TEMPORARY, "true");

        let mut durable = TestObject::with_id("EID-c");
        durable.creation_date = Some(cutoff - Duration::days(1));

        let mut undated = TestObject::with_id("EID-d");
        undated.set_property(PROP_TEMPORARY, "true");

        for object in [&at_cutoff, &just_after, &durable, &undated] {
            store.add(object).await.unwrap();
        }

        let expired = store.get_temporary_created_before(cutoff).await.unwrap();
        assert_eq!(expired, vec![at_cutoff]);
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("db/testobjects.db");

        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.add(&TestObject::with_id("EID1")).await.unwrap();
        }

        let reopened = SqliteStore::open(&path).await.unwrap();
        assert!(reopened.exists("EID1").await.unwrap());
    }
}
