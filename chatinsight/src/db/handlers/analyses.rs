//! Database repository for analysis records.

use rust_decimal::Decimal;
use sqlx::PgConnection;
use tracing::{instrument, trace};

use crate::db::errors::Result;
use crate::db::models::analyses::{Analysis, AnalysisCreateDBRequest};
use crate::types::SessionId;

/// Repository for analysis writes and lookups.
pub struct Analyses<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Analyses<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Insert many analyses in one statement.
    ///
    /// Sessions that already have an analysis are skipped (`analysis_session_id_unique`), so an
    /// overlapping run can never double-analyze a session. Returns the number of rows written.
    #[instrument(skip(self, requests), fields(count = requests.len()), err)]
    pub async fn bulk_create(&mut self, requests: &[AnalysisCreateDBRequest]) -> Result<u64> {
        if requests.is_empty() {
            return Ok(0);
        }

        let mut session_ids: Vec<SessionId> = Vec::with_capacity(requests.len());
        let mut summaries: Vec<String> = Vec::with_capacity(requests.len());
        let mut improvements: Vec<String> = Vec::with_capacity(requests.len());
        let mut satisfactions: Vec<i16> = Vec::with_capacity(requests.len());
        let mut input_tokens: Vec<i64> = Vec::with_capacity(requests.len());
        let mut output_tokens: Vec<i64> = Vec::with_capacity(requests.len());
        let mut input_prices: Vec<Decimal> = Vec::with_capacity(requests.len());
        let mut output_prices: Vec<Decimal> = Vec::with_capacity(requests.len());
        let mut models: Vec<String> = Vec::with_capacity(requests.len());

        for request in requests {
            session_ids.push(request.session_id);
            summaries.push(request.summary.clone());
            improvements.push(request.improvement.clone());
            satisfactions.push(request.satisfaction);
            input_tokens.push(request.input_tokens);
            output_tokens.push(request.output_tokens);
            input_prices.push(request.input_tokens_price);
            output_prices.push(request.output_tokens_price);
            models.push(request.llm_model.clone());
        }

        let result = sqlx::query(
            r#"
            INSERT INTO analysis (
                session_id, summary, improvement, satisfaction, input_tokens, output_tokens,
                input_tokens_price, output_tokens_price, llm_model
            )
            SELECT * FROM UNNEST(
                $1::bigint[], $2::text[], $3::text[], $4::smallint[], $5::bigint[], $6::bigint[],
                $7::numeric[], $8::numeric[], $9::text[]
            )
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(&session_ids)
        .bind(&summaries)
        .bind(&improvements)
        .bind(&satisfactions)
        .bind(&input_tokens)
        .bind(&output_tokens)
        .bind(&input_prices)
        .bind(&output_prices)
        .bind(&models)
        .execute(&mut *self.db)
        .await?;

        let inserted = result.rows_affected();
        trace!(inserted, requested = requests.len(), "Bulk inserted analyses");
        Ok(inserted)
    }

    /// Get the analysis for a session, if any.
    #[instrument(skip(self), err)]
    pub async fn get_by_session(&mut self, session_id: SessionId) -> Result<Option<Analysis>> {
        let analysis = sqlx::query_as::<_, Analysis>("SELECT * FROM analysis WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(analysis)
    }
}
