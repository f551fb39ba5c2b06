//! One analysis run: select, price, fan out, persist.
//!
//! A run never returns an error. Failures inside a session's unit of work are logged and
//! counted, and the session is picked up again next run because it still has no analysis.
//! Anything that breaks the run as a whole (storage, an unreachable pricing source under the
//! `abort` policy) ends it as [`RunOutcome::CriticalFailure`].

use std::sync::Arc;
use std::time::Instant;

use bon::Builder;
use futures::StreamExt;
use futures::stream;
use tracing::{error, info, instrument, warn};

use super::client::AnalysisClient;
use crate::config::{Config, PricingFallback};
use crate::db::models::analyses::AnalysisCreateDBRequest;
use crate::db::models::sessions::Session;
use crate::errors::{Error, Result};
use crate::metrics::{self, InflightGuard};
use crate::pricing::{PriceFilter, PriceSource, UnitPrices};
use crate::store::{AnalysisWriter, SessionReader};
use crate::transcript::render_transcript;

/// Per-run knobs, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisSettings {
    /// Model id used to look up prices
    pub model_id: String,
    pub provider: Option<String>,
    pub max_concurrency: usize,
    pub max_sessions_per_run: Option<i64>,
    pub on_pricing_unavailable: PricingFallback,
}

impl AnalysisSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model_id: config.pricing.model.clone().unwrap_or_else(|| config.llm.model.clone()),
            provider: config.pricing.provider.clone(),
            max_concurrency: config.analysis.max_concurrency,
            max_sessions_per_run: config.analysis.max_sessions_per_run.map(i64::from),
            on_pricing_unavailable: config.pricing.on_unavailable,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub selected: usize,
    pub analyzed: usize,
    pub failed: usize,
    /// Rows actually written; lower than `analyzed` if another run got there first
    pub persisted: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunSummary),
    CompletedWithNoWork,
    CriticalFailure { reason: String },
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed(_) => "completed",
            RunOutcome::CompletedWithNoWork => "no_work",
            RunOutcome::CriticalFailure { .. } => "critical_failure",
        }
    }
}

#[derive(Clone, Builder)]
pub struct BatchAnalyzer {
    sessions: Arc<dyn SessionReader>,
    analyses: Arc<dyn AnalysisWriter>,
    prices: Arc<dyn PriceSource>,
    client: AnalysisClient,
    settings: AnalysisSettings,
}

impl BatchAnalyzer {
    /// Execute one run to a terminal outcome.
    pub async fn run(&self) -> RunOutcome {
        let started = Instant::now();
        info!("Starting chatbot analysis run");

        let outcome = match self.try_run().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, kind = e.kind(), "Critical error in analysis run");
                RunOutcome::CriticalFailure { reason: e.to_string() }
            }
        };

        metrics::record_run(outcome.label(), started.elapsed());
        info!(outcome = outcome.label(), elapsed_ms = started.elapsed().as_millis() as u64, "Finished chatbot analysis run");
        outcome
    }

    async fn try_run(&self) -> Result<RunOutcome> {
        let sessions = self
            .sessions
            .find_eligible_sessions(self.settings.max_sessions_per_run)
            .await?;

        if sessions.is_empty() {
            info!("No sessions found for analysis");
            return Ok(RunOutcome::CompletedWithNoWork);
        }
        let selected = sessions.len();
        info!(selected, "Sessions found for analysis");

        let prices = self.resolve_prices().await?;

        let mut records: Vec<AnalysisCreateDBRequest> = stream::iter(sessions)
            .map(|session| self.process_session(session, prices))
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .filter_map(|record| async move { record })
            .collect()
            .await;
        records.sort_by_key(|record| record.session_id);

        let mut summary = RunSummary {
            selected,
            analyzed: records.len(),
            failed: selected - records.len(),
            persisted: 0,
        };

        if records.is_empty() {
            warn!(failed = summary.failed, "No analyses were created due to failures");
            return Ok(RunOutcome::Completed(summary));
        }

        summary.persisted = self.analyses.insert_analyses(&records).await?;
        metrics::record_persisted(summary.persisted);
        info!(
            persisted = summary.persisted,
            failed = summary.failed,
            "Analyses were successfully created"
        );

        Ok(RunOutcome::Completed(summary))
    }

    /// Look up the configured model's prices once for the whole run.
    #[instrument(skip(self), fields(model = %self.settings.model_id))]
    async fn resolve_prices(&self) -> Result<UnitPrices> {
        let filter = PriceFilter::new(self.settings.model_id.clone(), self.settings.provider.clone());

        match self.prices.fetch_quotes(&filter).await {
            Ok(quotes) => match quotes.first() {
                Some(quote) => {
                    info!(
                        provider = %quote.provider,
                        input_per_million = %quote.input_per_million,
                        output_per_million = %quote.output_per_million,
                        "Resolved token prices"
                    );
                    Ok(UnitPrices::from(quote))
                }
                None => {
                    warn!("No price quote matched, recording zero prices");
                    Ok(UnitPrices::zero())
                }
            },
            Err(Error::SourceUnavailable { message })
                if self.settings.on_pricing_unavailable == PricingFallback::Zero =>
            {
                warn!(%message, "Pricing source unavailable, recording zero prices");
                Ok(UnitPrices::zero())
            }
            Err(e) => Err(e),
        }
    }

    async fn process_session(&self, session: Session, prices: UnitPrices) -> Option<AnalysisCreateDBRequest> {
        let session_id = session.id;
        let _inflight = InflightGuard::start();

        match self.analyze_session(&session).await {
            Ok(result) => Some(result.into_record(session_id, &prices)),
            Err(e) => {
                if e.is_unit_failure() {
                    warn!(session_id, error = %e, "Error processing session");
                } else {
                    error!(session_id, error = %e, "Unexpected error processing session");
                }
                metrics::record_session_failure(e.kind());
                None
            }
        }
    }

    #[instrument(skip_all, fields(session_id = session.id, messages = session.messages.len()))]
    async fn analyze_session(&self, session: &Session) -> Result<super::AnalysisResult> {
        let transcript = render_transcript(&session.messages);
        self.client.analyze(&transcript).await
    }
}
