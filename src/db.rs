use crate::error::StorageError;
use crate::reading::Reading;
use crate::store::{ConfigStore, ReadingQuery, ReadingSink, Statistics, TimeRange};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder, Row};

/// Two binds per row keeps each statement far below the Postgres bind limit.
const INSERT_CHUNK_ROWS: usize = 10_000;

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS temperature_readings (
        id bigserial primary key,
        ts timestamptz not null,
        value numeric(18, 15) not null
    )
    "#,
    "CREATE INDEX IF NOT EXISTS temperature_readings_ts_idx ON temperature_readings (ts)",
    r#"
    CREATE TABLE IF NOT EXISTS read_config (
        config_key varchar(24) primary key,
        config_value varchar(256) not null
    )
    "#,
];

pub async fn build_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Creates both tables when missing. Existing data is left alone.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StorageError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigStore for PgStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = sqlx::query_scalar("SELECT config_value FROM read_config WHERE config_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn upsert(&self, key: &str, value: &str) -> Result<String, StorageError> {
        let committed = sqlx::query_scalar(
            r#"
            INSERT INTO read_config (config_key, config_value)
            VALUES ($1, $2)
            ON CONFLICT (config_key) DO UPDATE SET config_value = EXCLUDED.config_value
            RETURNING config_value
            "#,
        )
        .bind(key)
        .bind(value)
        .fetch_one(&self.pool)
        .await?;
        Ok(committed)
    }

    async fn ensure(&self, key: &str, default: &str) -> Result<String, StorageError> {
        // the CTE insert is invisible to the second SELECT, so at most one branch yields a row
        let stored: Option<String> = sqlx::query_scalar(
            r#"
            WITH inserted AS (
                INSERT INTO read_config (config_key, config_value)
                VALUES ($1, $2)
                ON CONFLICT (config_key) DO NOTHING
                RETURNING config_value
            )
            SELECT config_value FROM inserted
            UNION ALL
            SELECT config_value FROM read_config WHERE config_key = $1
            LIMIT 1
            "#,
        )
        .bind(key)
        .bind(default)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(stored) = stored {
            return Ok(stored);
        }

        // a concurrent insert committed after this statement's snapshot
        match self.get(key).await? {
            Some(stored) => Ok(stored),
            None => self.upsert(key, default).await,
        }
    }
}

#[async_trait]
impl ReadingSink for PgStore {
    async fn bulk_write(&self, readings: &[Reading]) -> Result<u64, StorageError> {
        if readings.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for chunk in readings.chunks(INSERT_CHUNK_ROWS) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO temperature_readings (ts, value) ");
            builder.push_values(chunk, |mut b, reading| {
                b.push_bind(reading.timestamp).push_bind(reading.value);
            });
            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }
}

#[async_trait]
impl ReadingQuery for PgStore {
    async fn current(&self) -> Result<Option<Reading>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT ts, value
            FROM temperature_readings
            ORDER BY ts DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Reading::new(
            row.try_get::<DateTime<Utc>, _>("ts")?,
            row.try_get::<Decimal, _>("value")?,
        )))
    }

    async fn statistics(&self, range: TimeRange) -> Result<Option<Statistics>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT MIN(value) AS min_value, MAX(value) AS max_value
            FROM temperature_readings
            WHERE ($1::timestamptz IS NULL OR ts >= $1)
              AND ($2::timestamptz IS NULL OR ts <= $2)
            "#,
        )
        .bind(range.after)
        .bind(range.before)
        .fetch_one(&self.pool)
        .await?;

        let min = row.try_get::<Option<Decimal>, _>("min_value")?;
        let max = row.try_get::<Option<Decimal>, _>("max_value")?;
        Ok(min.zip(max).map(|(min, max)| Statistics { min, max }))
    }
}
