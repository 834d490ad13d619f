//! Novelty store: establishment upserts and first-seen inspection inserts.
//!
//! Writes happen through a [`StoreBatch`], one transaction per source. A batch
//! that is dropped without [`StoreBatch::commit`] rolls back, so a failure
//! part-way through a source leaves none of its rows behind.

use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite, Transaction};
use std::str::FromStr;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::harvest::traits::StoreError;
use crate::model::{Establishment, Inspection, SourceId};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct NoveltyStore {
    pool: Pool<Sqlite>,
}

impl NoveltyStore {
    /// Connects to the database at `url` without touching the schema.
    ///
    /// In-memory databases exist per connection, so they are pinned to a
    /// single connection that is never recycled.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Connect(format!("invalid database url: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool_options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;

        info!(url, "Connected to inspection store");
        Ok(Self { pool })
    }

    /// Connects and applies pending migrations.
    pub async fn open(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let store = Self::connect(&config.url, config.max_connections).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Fresh migrated in-memory store.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let store = Self::connect("sqlite::memory:", 1).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        debug!("Store schema is up to date");
        Ok(())
    }

    /// Starts the write transaction for one source's records.
    pub async fn begin_batch(&self, source: &SourceId) -> Result<StoreBatch, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(StoreBatch {
            tx,
            source: source.clone(),
            pending_new: 0,
        })
    }

    pub async fn count_establishments(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM establishments")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn count_inspections(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM inspections")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn find_establishment(
        &self,
        establishment_id: &str,
        source: &SourceId,
    ) -> Result<Option<Establishment>, StoreError> {
        let row = sqlx::query(
            "SELECT establishment_id, path, name, address, category
             FROM establishments
             WHERE establishment_id = ? AND path = ?",
        )
        .bind(establishment_id)
        .bind(source.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Establishment {
            establishment_id: row.get("establishment_id"),
            source: SourceId::new(row.get::<String, _>("path")),
            name: row.get("name"),
            address: row.get::<Option<String>, _>("address").unwrap_or_default(),
            category: row.get::<Option<String>, _>("category").unwrap_or_default(),
        }))
    }

    /// Inspections stored for one establishment, oldest first.
    pub async fn inspections_for(
        &self,
        establishment_id: &str,
        source: &SourceId,
    ) -> Result<Vec<Inspection>, StoreError> {
        let rows = sqlx::query(
            "SELECT establishment_id, establishment_path, inspection_date, score, purpose
             FROM inspections
             WHERE establishment_id = ? AND establishment_path = ?
             ORDER BY inspection_date, id",
        )
        .bind(establishment_id)
        .bind(source.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut inspections = Vec::with_capacity(rows.len());
        for row in rows {
            let date: String = row.get("inspection_date");
            let date = NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(|e| {
                StoreError::Sqlx(sqlx::Error::Decode(Box::new(e)))
            })?;
            inspections.push(Inspection {
                establishment_id: row.get("establishment_id"),
                source: SourceId::new(row.get::<String, _>("establishment_path")),
                date,
                score: row.get("score"),
                purpose: row.get::<Option<String>, _>("purpose").unwrap_or_default(),
            });
        }
        Ok(inspections)
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Inspection store closed");
    }
}

/// Open write transaction for one source.
pub struct StoreBatch {
    tx: Transaction<'static, Sqlite>,
    source: SourceId,
    pending_new: usize,
}

impl StoreBatch {
    /// Inserts the establishment or refreshes its name, address and category.
    pub async fn upsert_establishment(
        &mut self,
        establishment: &Establishment,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO establishments (establishment_id, path, name, address, category)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (establishment_id, path) DO UPDATE SET
                 name = excluded.name,
                 address = excluded.address,
                 category = excluded.category",
        )
        .bind(&establishment.establishment_id)
        .bind(establishment.source.as_str())
        .bind(&establishment.name)
        .bind(&establishment.address)
        .bind(&establishment.category)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Inserts the inspection unless one with the same
    /// `(establishment, source, date, score)` exists. Returns `true` if inserted.
    ///
    /// The establishment must already be upserted in this batch.
    pub async fn insert_inspection_if_new(
        &mut self,
        inspection: &Inspection,
    ) -> Result<bool, StoreError> {
        let date = inspection.date.format(DATE_FORMAT).to_string();

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM inspections
             WHERE establishment_id = ? AND establishment_path = ?
               AND inspection_date = ? AND score = ?",
        )
        .bind(&inspection.establishment_id)
        .bind(inspection.source.as_str())
        .bind(&date)
        .bind(inspection.score)
        .fetch_optional(&mut *self.tx)
        .await?;

        if existing.is_some() {
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO inspections
                 (establishment_id, establishment_path, inspection_date, score, purpose)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&inspection.establishment_id)
        .bind(inspection.source.as_str())
        .bind(&date)
        .bind(inspection.score)
        .bind(&inspection.purpose)
        .execute(&mut *self.tx)
        .await?;

        self.pending_new += 1;
        Ok(true)
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        debug!(source = %self.source, new = self.pending_new, "Committing source batch");
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
