//! PostgreSQL implementation of [`DatasetStore`].
//!
//! Samples go to the `samples` table keyed by sample id; each batch is a single `batch_history`
//! row upserted on every checkpoint, with its switch history, error log and circuit breaker state
//! stored as JSONB.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;

use super::{DatasetStore, Result, StoreError};
use crate::config::DatabaseConfig;
use crate::types::{
    BatchId, BatchState, BatchStatus, CircuitBreakerSummary, ErrorEntry, GeneratedSample, ModelSwitch,
};

const BATCH_COLUMNS: &str = r#"
    batch_id, status, target_count, generated_count, current_model, consecutive_failures,
    switch_count, total_tokens, current_sample, topic_filter, difficulty_filter,
    reasoning_instruction, sample_type, model_switches, errors, skipped_topics, circuit_breaker_summary,
    started_at, updated_at, completed_at
"#;

/// PostgreSQL-backed dataset store.
///
/// # Example
/// ```ignore
/// let store = PostgresStore::connect(&database_config).await?;
/// store.append_sample(&sample).await?;
/// ```
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool and run pending migrations.
    pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        crate::migrator().run(&pool).await?;
        tracing::info!(max_connections = config.max_connections, "Connected to dataset database");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn batch_from_row(row: &PgRow) -> Result<BatchState> {
    let status: String = row.try_get("status")?;
    let status = status.parse::<BatchStatus>().map_err(|e| StoreError::Other(anyhow::anyhow!(e)))?;
    let Json(model_switch_history): Json<Vec<ModelSwitch>> = row.try_get("model_switches")?;
    let Json(error_log): Json<Vec<ErrorEntry>> = row.try_get("errors")?;
    let Json(skipped_topics): Json<Vec<String>> = row.try_get("skipped_topics")?;
    // Rows written before the breaker existed hold an empty object
    let Json(circuit_breaker_summary): Json<CircuitBreakerSummary> = row.try_get("circuit_breaker_summary")?;

    Ok(BatchState {
        batch_id: BatchId::from(row.try_get::<String, _>("batch_id")?),
        status,
        target_count: row.try_get::<i32, _>("target_count")?.max(0) as u32,
        generated_count: row.try_get::<i32, _>("generated_count")?.max(0) as u32,
        current_model: row.try_get("current_model")?,
        model_switch_history,
        consecutive_failures: row.try_get::<i32, _>("consecutive_failures")?.max(0) as u32,
        switch_count: row.try_get::<i32, _>("switch_count")?.max(0) as u32,
        total_tokens: row.try_get::<i64, _>("total_tokens")?.max(0) as u64,
        current_sample: row.try_get("current_sample")?,
        topic_filter: row.try_get("topic_filter")?,
        difficulty_filter: row.try_get("difficulty_filter")?,
        reasoning_instruction: row.try_get("reasoning_instruction")?,
        sample_type: row.try_get("sample_type")?,
        started_at: row.try_get::<DateTime<Utc>, _>("started_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        completed_at: row.try_get("completed_at")?,
        error_log,
        skipped_topics,
        circuit_breaker_summary,
    })
}

#[async_trait]
impl DatasetStore for PostgresStore {
    #[tracing::instrument(skip(self, sample), fields(sample_id = %sample.id), err)]
    async fn append_sample(&self, sample: &GeneratedSample) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO samples (
                id, batch_id, question, answer, topic, difficulty, case_citation, reasoning,
                jurisdiction, sample_type, provider, model, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&sample.id)
        .bind(sample.batch_id.as_ref().map(BatchId::as_str))
        .bind(&sample.question)
        .bind(&sample.answer)
        .bind(&sample.topic)
        .bind(&sample.difficulty)
        .bind(&sample.case_citation)
        .bind(&sample.reasoning)
        .bind(&sample.jurisdiction)
        .bind(&sample.sample_type)
        .bind(&sample.provider)
        .bind(&sample.model)
        .bind(sample.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateSample { id: sample.id.clone() })
            }
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(skip(self, state), fields(batch_id = %state.batch_id, status = %state.status), err)]
    async fn save_batch(&self, state: &BatchState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO batch_history (
                batch_id, status, target_count, generated_count, current_model, consecutive_failures,
                switch_count, total_tokens, current_sample, topic_filter, difficulty_filter,
                reasoning_instruction, sample_type, model_switches, errors, skipped_topics,
                circuit_breaker_summary, started_at, updated_at, completed_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20
            )
            ON CONFLICT (batch_id) DO UPDATE SET
                status = EXCLUDED.status,
                generated_count = EXCLUDED.generated_count,
                current_model = EXCLUDED.current_model,
                consecutive_failures = EXCLUDED.consecutive_failures,
                switch_count = EXCLUDED.switch_count,
                total_tokens = EXCLUDED.total_tokens,
                current_sample = EXCLUDED.current_sample,
                model_switches = EXCLUDED.model_switches,
                errors = EXCLUDED.errors,
                skipped_topics = EXCLUDED.skipped_topics,
                circuit_breaker_summary = EXCLUDED.circuit_breaker_summary,
                updated_at = EXCLUDED.updated_at,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(state.batch_id.as_str())
        .bind(state.status.as_str())
        .bind(state.target_count as i32)
        .bind(state.generated_count as i32)
        .bind(&state.current_model)
        .bind(state.consecutive_failures as i32)
        .bind(state.switch_count as i32)
        .bind(state.total_tokens as i64)
        .bind(&state.current_sample)
        .bind(&state.topic_filter)
        .bind(&state.difficulty_filter)
        .bind(&state.reasoning_instruction)
        .bind(&state.sample_type)
        .bind(Json(&state.model_switch_history))
        .bind(Json(&state.error_log))
        .bind(Json(&state.skipped_topics))
        .bind(Json(&state.circuit_breaker_summary))
        .bind(state.started_at)
        .bind(state.updated_at)
        .bind(state.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_batch(&self, batch_id: &BatchId) -> Result<BatchState> {
        let query = format!("SELECT {BATCH_COLUMNS} FROM batch_history WHERE batch_id = $1");
        let row = sqlx::query(&query)
            .bind(batch_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                batch_id: batch_id.clone(),
            })?;
        batch_from_row(&row)
    }

    async fn get_batch_history(&self) -> Result<Vec<BatchState>> {
        let query = format!("SELECT {BATCH_COLUMNS} FROM batch_history ORDER BY started_at DESC, batch_id DESC");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(batch_from_row).collect()
    }

    async fn count_samples(&self, batch_id: Option<&BatchId>) -> Result<u64> {
        let count: i64 = match batch_id {
            Some(id) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM samples WHERE batch_id = $1")
                    .bind(id.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => sqlx::query_scalar("SELECT COUNT(*) FROM samples").fetch_one(&self.pool).await?,
        };
        Ok(count.max(0) as u64)
    }
}
