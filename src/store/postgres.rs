//! PostgreSQL swap store

use super::{apply_mutation, validate_id, Mutator, StoreStats, SwapStore};
use crate::config::StorageConfig;
use crate::error::{StoreError, StoreResult};
use crate::swap::{SwapRecord, SwapState};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Row;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect using the storage section of the configuration
    pub async fn connect(config: &StorageConfig) -> StoreResult<Self> {
        let Some(url) = config.url.as_deref() else {
            return Err(StoreError::Database(sqlx::Error::Configuration(
                "storage.url is not set".into(),
            )));
        };

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables if they do not exist
    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS swaps (
                id VARCHAR(128) PRIMARY KEY,
                direction VARCHAR(20) NOT NULL,
                state VARCHAR(20) NOT NULL,
                expiry_timestamp BIGINT NOT NULL,
                record JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_swaps_state
            ON swaps (state)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    fn decode(row: &sqlx::postgres::PgRow) -> StoreResult<SwapRecord> {
        let Json(record): Json<SwapRecord> = row.try_get("record")?;
        let state: String = row.try_get("state")?;
        if record.state.as_str() != state {
            return Err(StoreError::Corrupt(format!(
                "swap {} state column {} disagrees with record {}",
                record.id, state, record.state
            )));
        }
        Ok(record)
    }
}

#[async_trait]
impl SwapStore for PostgresStore {
    async fn create(&self, record: &SwapRecord) -> StoreResult<()> {
        validate_id(&record.id)?;

        let result = sqlx::query(
            r#"
            INSERT INTO swaps (id, direction, state, expiry_timestamp, record, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(record.direction().as_str())
        .bind(record.state.as_str())
        .bind(db_timestamp(record)?)
        .bind(Json(record))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DuplicateId(record.id.clone()));
        }

        debug!("Stored swap {}", record.id);
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<SwapRecord> {
        validate_id(id)?;
        let row = sqlx::query("SELECT state, record FROM swaps WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        Self::decode(&row)
    }

    async fn update(&self, id: &str, mutate: Mutator) -> StoreResult<SwapRecord> {
        validate_id(id)?;
        let mut tx = self.pool.begin().await?;

        // Row lock serialises concurrent updates on the same swap
        let row = sqlx::query("SELECT state, record FROM swaps WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let current = Self::decode(&row)?;
        let next = apply_mutation(&current, mutate)?;

        sqlx::query(
            r#"
            UPDATE swaps
            SET state = $2, record = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(next.state.as_str())
        .bind(Json(&next))
        .bind(next.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(next)
    }

    async fn list_by_state(&self, state: SwapState) -> StoreResult<Vec<SwapRecord>> {
        let rows = sqlx::query(
            "SELECT state, record FROM swaps WHERE state = $1 ORDER BY created_at, id",
        )
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::decode).collect()
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        validate_id(id)?;
        let result = sqlx::query(
            "DELETE FROM swaps WHERE id = $1 AND state IN ('claimed', 'refunded', 'failed')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let record = self.get(id).await?;
        Err(StoreError::NotTerminal {
            swap_id: record.id,
            state: record.state,
        })
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS count FROM swaps GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut by_state: BTreeMap<String, usize> = SwapState::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for row in rows {
            let state: String = row.try_get("state")?;
            let count: i64 = row.try_get("count")?;
            by_state.insert(state, count as usize);
        }

        Ok(StoreStats { by_state })
    }
}

/// Expiry as a BIGINT; values past `i64::MAX` are refused rather than wrapped
fn db_timestamp(record: &SwapRecord) -> StoreResult<i64> {
    i64::try_from(record.expiry_timestamp).map_err(|_| StoreError::OutOfRange {
        swap_id: record.id.clone(),
        field: "expiry_timestamp",
    })
}
