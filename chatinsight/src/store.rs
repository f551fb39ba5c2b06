//! Storage capabilities consumed by the analysis pipeline.
//!
//! The orchestrator only needs two things from persistence: the sessions waiting for analysis
//! and a bulk write for finished records. Both are traits so runs can be exercised against an
//! in-memory store; [`PgStore`] is the PostgreSQL implementation over the repositories in
//! [`crate::db::handlers`].

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{instrument, warn};

use crate::db::errors::Result;
use crate::db::handlers::{Analyses, Sessions};
use crate::db::models::analyses::AnalysisCreateDBRequest;
use crate::db::models::sessions::Session;

/// Reads sessions with no analysis record and at least one message.
#[async_trait]
pub trait SessionReader: Send + Sync {
    async fn find_eligible_sessions(&self, limit: Option<i64>) -> Result<Vec<Session>>;
}

/// Persists finished analyses in bulk, returning the number of rows written.
#[async_trait]
pub trait AnalysisWriter: Send + Sync {
    async fn insert_analyses(&self, records: &[AnalysisCreateDBRequest]) -> Result<u64>;
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionReader for PgStore {
    #[instrument(skip(self), err)]
    async fn find_eligible_sessions(&self, limit: Option<i64>) -> Result<Vec<Session>> {
        let mut conn = self.pool.acquire().await?;
        Sessions::new(&mut conn).find_eligible(limit).await
    }
}

#[async_trait]
impl AnalysisWriter for PgStore {
    #[instrument(skip(self, records), fields(count = records.len()), err)]
    async fn insert_analyses(&self, records: &[AnalysisCreateDBRequest]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let inserted = Analyses::new(&mut tx).bulk_create(records).await.inspect_err(|e| {
            if let Some(constraint) = e.constraint() {
                warn!(constraint, error = %e, "Analysis batch rejected by constraint");
            }
        })?;
        tx.commit().await?;
        Ok(inserted)
    }
}
