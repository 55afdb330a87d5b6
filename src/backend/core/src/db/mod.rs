//! Database layer.
//!
//! PostgreSQL storage for job records with sqlx.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::batch::{
    ConversionOutput, JobFailure, JobRecord, JobStatus, PersistenceError, PersistenceSink,
    RecordIdentity,
};
use crate::config::DatabaseConfig;
use crate::error::Result;

/// Database connection and operations.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check connectivity.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// [`PersistenceSink`] over the `conversion_records` table.
#[derive(Clone)]
pub struct PgPersistenceSink {
    db: Database,
}

impl PgPersistenceSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PersistenceSink for PgPersistenceSink {
    async fn find(
        &self,
        identity: &RecordIdentity,
    ) -> std::result::Result<Option<JobRecord>, PersistenceError> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT batch_name, file_name, job_id, status, attempts, output, error,
                   input_digest, updated_at
            FROM conversion_records
            WHERE batch_name = $1 AND file_name = $2
            "#,
        )
        .bind(&identity.batch_name)
        .bind(&identity.file_name)
        .fetch_optional(self.db.pool())
        .await
        .map_err(backend)?;

        row.map(RecordRow::into_record).transpose()
    }

    async fn insert(&self, record: &JobRecord) -> std::result::Result<(), PersistenceError> {
        let (output, error) = payloads(record)?;

        sqlx::query(
            r#"
            INSERT INTO conversion_records
                (batch_name, file_name, job_id, status, attempts, output, error,
                 input_digest, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&record.identity.batch_name)
        .bind(&record.identity.file_name)
        .bind(record.job_id.0)
        .bind(record.status.to_string())
        .bind(record.attempts as i32)
        .bind(output)
        .bind(error)
        .bind(&record.input_digest)
        .bind(record.updated_at)
        .execute(self.db.pool())
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                PersistenceError::Duplicate(record.identity.clone())
            }
            _ => backend(e),
        })?;

        Ok(())
    }

    async fn update(
        &self,
        identity: &RecordIdentity,
        record: &JobRecord,
    ) -> std::result::Result<(), PersistenceError> {
        let (output, error) = payloads(record)?;

        let result = sqlx::query(
            r#"
            UPDATE conversion_records
            SET job_id = $3, status = $4, attempts = $5, output = $6, error = $7,
                input_digest = $8, updated_at = $9
            WHERE batch_name = $1 AND file_name = $2
            "#,
        )
        .bind(&identity.batch_name)
        .bind(&identity.file_name)
        .bind(record.job_id.0)
        .bind(record.status.to_string())
        .bind(record.attempts as i32)
        .bind(output)
        .bind(error)
        .bind(&record.input_digest)
        .bind(record.updated_at)
        .execute(self.db.pool())
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::NotFound(identity.clone()));
        }
        Ok(())
    }
}

fn backend(error: sqlx::Error) -> PersistenceError {
    PersistenceError::Backend(error.to_string())
}

fn payloads(
    record: &JobRecord,
) -> std::result::Result<(Option<serde_json::Value>, Option<serde_json::Value>), PersistenceError>
{
    let encode = |e: serde_json::Error| PersistenceError::Backend(e.to_string());
    let output = record
        .output
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(encode)?;
    let error = record
        .error
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(encode)?;
    Ok((output, error))
}

fn parse_status(s: &str) -> Option<JobStatus> {
    JobStatus::ALL.into_iter().find(|status| status.to_string() == s)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row Types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    batch_name: String,
    file_name: String,
    job_id: Uuid,
    status: String,
    attempts: i32,
    output: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
    input_digest: String,
    updated_at: DateTime<Utc>,
}

impl RecordRow {
    fn into_record(self) -> std::result::Result<JobRecord, PersistenceError> {
        let status = parse_status(&self.status).ok_or_else(|| {
            PersistenceError::Backend(format!("unknown status in store: {}", self.status))
        })?;
        let decode = |e: serde_json::Error| PersistenceError::Backend(e.to_string());
        let output = self
            .output
            .map(serde_json::from_value::<ConversionOutput>)
            .transpose()
            .map_err(decode)?;
        let error = self
            .error
            .map(serde_json::from_value::<JobFailure>)
            .transpose()
            .map_err(decode)?;

        Ok(JobRecord {
            identity: RecordIdentity::new(self.batch_name, self.file_name),
            job_id: self.job_id.into(),
            status,
            attempts: self.attempts.max(0) as u32,
            output,
            error,
            input_digest: self.input_digest,
            updated_at: self.updated_at,
        })
    }
}
