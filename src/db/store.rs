//! Local record store: one keyed collection per entity type.
//!
//! Single calls on the store are independent. A multi-step rewrite of one
//! collection runs on a transaction from [`LocalStore::begin`] through the
//! connection-level functions, so it lands entirely or not at all.

use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};

use crate::errors::AppError;
use crate::models::{EntityType, Record, WriteFailure};

const SELECT_COLUMNS: &str = "SELECT id, is_synced, created_at, updated_at, payload FROM records";

/// Outcome of a best-effort bulk insert.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BulkInsertReport {
    pub inserted: Vec<String>,
    pub failures: Vec<WriteFailure>,
}

/// SQLite-backed store for cached records.
#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a transaction. Dropping it without a commit rolls every write back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, AppError> {
        Ok(self.pool.begin().await?)
    }

    /// All records of one entity type, in insertion order. Unreadable rows are
    /// logged and skipped.
    pub async fn get_all(&self, entity: EntityType) -> Result<Vec<Record>, AppError> {
        let rows = sqlx::query(&format!("{} WHERE entity_type = ? ORDER BY rowid", SELECT_COLUMNS))
            .bind(entity.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            match record_from_row(row) {
                Ok(record) => records.push(record),
                Err(e) => {
                    let id: String = row.get("id");
                    tracing::warn!(entity = %entity, id = %id, "Skipping unreadable cached record: {}", e);
                }
            }
        }
        Ok(records)
    }

    /// Like [`get_all`](Self::get_all), but an unreadable row is a storage
    /// error. Used before a rewrite, which would otherwise delete that row.
    pub async fn get_all_checked(&self, entity: EntityType) -> Result<Vec<Record>, AppError> {
        let rows = sqlx::query(&format!("{} WHERE entity_type = ? ORDER BY rowid", SELECT_COLUMNS))
            .bind(entity.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                record_from_row(row).map_err(|e| {
                    let id: String = row.get("id");
                    tracing::error!(entity = %entity, id = %id, "Unreadable cached record: {}", e);
                    AppError::Storage(format!("cached {} {} is unreadable", entity, id))
                })
            })
            .collect()
    }

    /// Get one record by id.
    pub async fn get(&self, entity: EntityType, id: &str) -> Result<Option<Record>, AppError> {
        let row = sqlx::query(&format!("{} WHERE entity_type = ? AND id = ?", SELECT_COLUMNS))
            .bind(entity.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(record_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Number of records of one entity type.
    pub async fn count(&self, entity: EntityType) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM records WHERE entity_type = ?")
            .bind(entity.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// Insert or overwrite a record by id.
    pub async fn upsert(&self, entity: EntityType, record: &Record) -> Result<(), AppError> {
        let mut conn = self.pool.acquire().await?;
        Self::upsert_on(&mut conn, entity, record).await
    }

    /// Delete one record. Returns false when it did not exist.
    pub async fn delete(&self, entity: EntityType, id: &str) -> Result<bool, AppError> {
        let mut conn = self.pool.acquire().await?;
        Self::delete_on(&mut conn, entity, id).await
    }

    /// [`delete`](Self::delete) on a given connection or transaction.
    pub async fn delete_on(
        conn: &mut SqliteConnection,
        entity: EntityType,
        id: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM records WHERE entity_type = ? AND id = ?")
            .bind(entity.as_str())
            .bind(id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove every record of one entity type. Returns how many were removed.
    pub async fn clear_all(conn: &mut SqliteConnection, entity: EntityType) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM records WHERE entity_type = ?")
            .bind(entity.as_str())
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Insert a batch of new records.
    ///
    /// Individual failures (validation, id collisions) are collected and the
    /// rest of the batch still lands.
    pub async fn bulk_insert(
        conn: &mut SqliteConnection,
        entity: EntityType,
        records: &[Record],
        skip_validation: bool,
    ) -> BulkInsertReport {
        let mut report = BulkInsertReport::default();
        let stored_at = Utc::now().to_rfc3339();

        for record in records {
            if !skip_validation {
                if let Err(message) = validate_record(record) {
                    tracing::warn!(entity = %entity, id = %record.id, "Rejected record: {}", message);
                    report.failures.push(WriteFailure {
                        id: record.id.clone(),
                        message,
                    });
                    continue;
                }
            }

            let payload = payload_json(record);
            let result = sqlx::query(
                "INSERT INTO records (entity_type, id, is_synced, created_at, updated_at, payload, stored_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(entity.as_str())
            .bind(&record.id)
            .bind(record.is_synced as i32)
            .bind(&record.created_at)
            .bind(&record.updated_at)
            .bind(&payload)
            .bind(&stored_at)
            .execute(&mut *conn)
            .await;

            match result {
                Ok(_) => report.inserted.push(record.id.clone()),
                Err(e) => {
                    tracing::warn!(entity = %entity, id = %record.id, "Failed to insert record: {}", e);
                    report.failures.push(WriteFailure {
                        id: record.id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        report
    }

    /// [`upsert`](Self::upsert) on a given connection or transaction.
    pub async fn upsert_on(
        conn: &mut SqliteConnection,
        entity: EntityType,
        record: &Record,
    ) -> Result<(), AppError> {
        validate_record(record).map_err(AppError::Validation)?;

        let payload = payload_json(record);
        let stored_at = Utc::now().to_rfc3339();

        sqlx::query(
            r#"INSERT INTO records (entity_type, id, is_synced, created_at, updated_at, payload, stored_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(entity_type, id) DO UPDATE SET
                   is_synced = excluded.is_synced,
                   created_at = excluded.created_at,
                   updated_at = excluded.updated_at,
                   payload = excluded.payload,
                   stored_at = excluded.stored_at"#,
        )
        .bind(entity.as_str())
        .bind(&record.id)
        .bind(record.is_synced as i32)
        .bind(&record.created_at)
        .bind(&record.updated_at)
        .bind(&payload)
        .bind(&stored_at)
        .execute(conn)
        .await?;

        Ok(())
    }
}

fn validate_record(record: &Record) -> Result<(), String> {
    if record.id.trim().is_empty() {
        return Err("record id is empty".to_string());
    }
    if record.id.trim() != record.id {
        return Err(format!("record id {:?} has surrounding whitespace", record.id));
    }
    Ok(())
}

fn payload_json(record: &Record) -> String {
    Value::Object(record.fields.clone()).to_string()
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Record, AppError> {
    let is_synced: i32 = row.get("is_synced");
    let payload: String = row.get("payload");
    let fields: Map<String, Value> = serde_json::from_str(&payload)?;

    Ok(Record {
        id: row.get("id"),
        is_synced: is_synced != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use tempfile::TempDir;

    async fn store() -> (LocalStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let pool = init_database(&temp_dir.path().join("cache.sqlite"))
            .await
            .expect("Failed to init DB");
        (LocalStore::new(pool), temp_dir)
    }

    fn product(id: &str, name: &str) -> Record {
        Record::new(id).with_field("name", name)
    }

    #[tokio::test]
    async fn test_bulk_insert_collects_per_record_failures() {
        let (store, _dir) = store().await;

        let records = vec![
            product("p1", "Rice"),
            product("p1", "Rice again"),
            product("  ", "Blank"),
            product("p2", "Dal"),
        ];
        let mut tx = store.begin().await.unwrap();
        let report = LocalStore::bulk_insert(&mut tx, EntityType::Product, &records, false).await;
        tx.commit().await.unwrap();

        assert_eq!(report.inserted, vec!["p1", "p2"]);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(store.count(EntityType::Product).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let (store, _dir) = store().await;

        store
            .upsert(EntityType::Customer, &Record::new("c1").with_field("name", "Asha"))
            .await
            .unwrap();
        store
            .upsert(
                EntityType::Customer,
                &Record::new("c1").with_field("name", "Asha K").synced(true),
            )
            .await
            .unwrap();

        let all = store.get_all(EntityType::Customer).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].text("name"), Some("Asha K"));
        assert!(all[0].is_synced);
    }

    #[tokio::test]
    async fn test_entity_collections_are_isolated() {
        let (store, _dir) = store().await;

        store
            .upsert(EntityType::Product, &product("shared-id", "Soap"))
            .await
            .unwrap();
        store
            .upsert(EntityType::Customer, &Record::new("shared-id").with_field("name", "Ravi"))
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(LocalStore::clear_all(&mut tx, EntityType::Product).await.unwrap(), 1);
        tx.commit().await.unwrap();
        assert!(store.get_all(EntityType::Product).await.unwrap().is_empty());
        assert_eq!(store.get_all(EntityType::Customer).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_all_preserves_insertion_order_and_fields() {
        let (store, _dir) = store().await;

        let records = vec![
            product("b", "Second").created("2024-05-01T10:00:00+00:00"),
            product("a", "First"),
        ];
        let mut tx = store.begin().await.unwrap();
        let report = LocalStore::bulk_insert(&mut tx, EntityType::Product, &records, true).await;
        tx.commit().await.unwrap();
        assert!(report.failures.is_empty());

        let all = store.get_all(EntityType::Product).await.unwrap();
        assert_eq!(all, records);
    }

    #[tokio::test]
    async fn test_checked_read_fails_on_unreadable_row() {
        let (store, _dir) = store().await;
        store
            .upsert(EntityType::Product, &product("p1", "Rice"))
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO records (entity_type, id, is_synced, payload, stored_at) VALUES ('product', 'p2', 0, 'not json', 'now')",
        )
        .execute(store.pool())
        .await
        .unwrap();

        assert_eq!(store.get_all(EntityType::Product).await.unwrap().len(), 1);
        let err = store.get_all_checked(EntityType::Product).await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let (store, _dir) = store().await;
        store
            .upsert(EntityType::Product, &product("p1", "Rice"))
            .await
            .unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            LocalStore::clear_all(&mut tx, EntityType::Product).await.unwrap();
            LocalStore::upsert_on(&mut tx, EntityType::Product, &product("p2", "Dal"))
                .await
                .unwrap();
        }

        let all = store.get_all(EntityType::Product).await.unwrap();
        assert_eq!(all, vec![product("p1", "Rice")]);
    }

    #[tokio::test]
    async fn test_delete_reports_missing() {
        let (store, _dir) = store().await;
        store
            .upsert(EntityType::Order, &Record::new("o1"))
            .await
            .unwrap();

        assert!(store.delete(EntityType::Order, "o1").await.unwrap());
        assert!(!store.delete(EntityType::Order, "o1").await.unwrap());
        assert!(store.get(EntityType::Order, "o1").await.unwrap().is_none());
    }
}
