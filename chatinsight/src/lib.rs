//! # chatinsight: scheduled LLM evaluation of chatbot conversations
//!
//! `chatinsight` reads the conversation sessions a customer-facing chatbot writes to PostgreSQL,
//! asks a language model to grade each one (a 0-10 satisfaction score, a bullet summary and
//! bullet improvement points) and stores the result together with the token usage and the
//! per-token prices in force at the time, so the cost of every evaluation can be reported.
//!
//! ## Architecture
//!
//! A run is driven by [`analysis::BatchAnalyzer`]:
//!
//! 1. select sessions with messages and no analysis yet ([`store::SessionReader`])
//! 2. look up the model's token prices once ([`pricing::PriceSource`])
//! 3. for each session, concurrently: render the transcript ([`transcript`]), call the model
//!    ([`llm::ChatModel`]) and validate the JSON it returns ([`analysis::parse`])
//! 4. bulk insert the successful results ([`store::AnalysisWriter`])
//!
//! A failure in one session never affects the others; the session simply stays unanalyzed and
//! is selected again next run. [`analysis::AnalysisScheduler`] repeats runs on a fixed interval
//! and, with leader election enabled, only on one replica.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use chatinsight::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = chatinsight::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     chatinsight::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.run(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! ## Database Setup
//!
//! Migrations run on startup and create the tables if they do not exist yet:
//!
//! ```no_run
//! # use sqlx::PgPool;
//! # async fn example(pool: PgPool) -> Result<(), sqlx::migrate::MigrateError> {
//! chatinsight::migrator().run(&pool).await?;
//! # Ok(())
//! # }
//! ```
pub mod analysis;
pub mod config;
pub mod db;
pub mod errors;
pub mod http;
mod leader_election;
pub mod llm;
pub mod metrics;
pub mod pricing;
pub mod store;
pub mod telemetry;
pub mod transcript;
mod types;

#[cfg(test)]
pub(crate) mod test_utils;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info};

use crate::analysis::{AnalysisClient, AnalysisScheduler, AnalysisSettings, BatchAnalyzer, RunOutcome};
use crate::llm::OpenAiChatModel;
use crate::pricing::{FixedPriceSource, HtmlPriceTable, PriceSource};
use crate::store::PgStore;

pub use config::Config;
pub use types::{AnalysisId, MessageId, SessionId};

/// Get the chatinsight database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Connect to the configured database and run migrations.
async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let url = config
        .database_url()
        .ok_or_else(|| anyhow::anyhow!("No database URL configured"))?;
    let settings = &config.database.pool;

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .idle_timeout((settings.idle_timeout_secs > 0).then_some(Duration::from_secs(settings.idle_timeout_secs)))
        .max_lifetime((settings.max_lifetime_secs > 0).then_some(Duration::from_secs(settings.max_lifetime_secs)))
        .connect(url)
        .await?;

    migrator().run(&pool).await?;
    Ok(pool)
}

/// The configured price source: fixed prices when given, otherwise the pricing page.
pub fn build_price_source(config: &Config) -> errors::Result<Arc<dyn PriceSource>> {
    match &config.pricing.fixed {
        Some(fixed) => {
            info!(
                input_per_million = %fixed.input_per_million,
                output_per_million = %fixed.output_per_million,
                "Using fixed token prices"
            );
            Ok(Arc::new(FixedPriceSource::new(fixed.input_per_million, fixed.output_per_million)))
        }
        None => Ok(Arc::new(HtmlPriceTable::new(
            config.pricing.source_url.clone(),
            config.pricing.request_timeout,
        )?)),
    }
}

fn build_analyzer(config: &Config, pool: PgPool) -> errors::Result<BatchAnalyzer> {
    let store = Arc::new(PgStore::new(pool));
    let model = Arc::new(OpenAiChatModel::new(&config.llm)?);

    Ok(BatchAnalyzer::builder()
        .sessions(store.clone())
        .analyses(store)
        .prices(build_price_source(config)?)
        .client(AnalysisClient::new(model))
        .settings(AnalysisSettings::from_config(config))
        .build())
}

/// Tasks running alongside the main future (the scheduler, or leader election around it).
///
/// Dropping this cancels the shutdown token, which stops every task.
pub struct BackgroundServices {
    background_tasks: Vec<JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

fn spawn_scheduler(scheduler: AnalysisScheduler, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = scheduler.run(shutdown).await {
            error!("Analysis scheduler error: {}", e);
        }
    })
}

/// The scheduler task started when this replica became leader.
struct LeaderSession {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl LeaderSession {
    /// Cancel the scheduler and wait for it, so no run outlives leadership.
    async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            error!("Analysis scheduler task failed: {}", e);
        }
    }
}

/// Start the scheduler directly, or under leader election when it is enabled.
fn setup_background_services(
    pool: PgPool,
    config: &Config,
    scheduler: AnalysisScheduler,
    shutdown_token: CancellationToken,
) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    if !config.analysis.enabled {
        info!("Analysis scheduler disabled by configuration");
    } else if !config.leader_election.enabled {
        info!("Launching without leader election: running the analysis scheduler");
        background_tasks.push(spawn_scheduler(scheduler, shutdown_token.clone()));
    } else {
        info!("Starting leader election - will attempt to acquire leadership");

        let leadership: Arc<tokio::sync::Mutex<Option<LeaderSession>>> = Arc::new(tokio::sync::Mutex::new(None));
        let leadership_gain = leadership.clone();
        let leadership_lose = leadership.clone();
        let shutdown_for_gain = shutdown_token.clone();
        let check_interval = config.leader_election.check_interval;

        let handle = tokio::spawn(leader_election::leader_election_task(
            pool,
            check_interval,
            Arc::new(AtomicBool::new(false)),
            config::ANALYSIS_LEADER_LOCK_ID,
            shutdown_token.clone(),
            move || {
                let scheduler = scheduler.clone();
                let leadership = leadership_gain.clone();
                let token = shutdown_for_gain.child_token();
                async move {
                    let handle = spawn_scheduler(scheduler, token.clone());
                    *leadership.lock().await = Some(LeaderSession { token, handle });
                    info!("Analysis scheduler started on elected leader");
                    Ok(())
                }
            },
            move || {
                let leadership = leadership_lose.clone();
                async move {
                    if let Some(session) = leadership.lock().await.take() {
                        session.stop().await;
                        info!("Analysis scheduler stopped (lost leadership)");
                    }
                    Ok(())
                }
            },
        ));
        background_tasks.push(handle);
    }

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// Main application struct that owns the pool, the analyzer and the lifecycle.
///
/// 1. **Create**: [`Application::new`] connects, migrates and wires the analyzer
/// 2. **Run**: [`Application::run`] starts metrics and background services until shutdown, or
///    [`Application::run_once`] performs a single pass
pub struct Application {
    config: Config,
    pool: PgPool,
    analyzer: Arc<BatchAnalyzer>,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting chatinsight with configuration: {:#?}", config);
        let pool = setup_database(&config).await?;
        Self::new_with_pool(config, pool)
    }

    /// Build on an existing, already migrated pool
    pub fn new_with_pool(config: Config, pool: PgPool) -> anyhow::Result<Self> {
        let analyzer = Arc::new(build_analyzer(&config, pool.clone())?);
        Ok(Self { config, pool, analyzer })
    }

    /// Run a single analysis pass
    pub async fn run_once(&self) -> RunOutcome {
        self.analyzer.run().await
    }

    /// Run the scheduler until `shutdown` resolves, then stop everything gracefully
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.config.metrics.enabled {
            metrics::install(self.config.metrics.listen_address)?;
        }

        let scheduler = AnalysisScheduler::new(
            self.analyzer.clone(),
            self.config.analysis.interval,
            self.config.analysis.run_on_startup,
        );
        let bg_services = setup_background_services(self.pool.clone(), &self.config, scheduler, CancellationToken::new());

        shutdown.await;

        bg_services.shutdown().await;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::analysis::RunSummary;
    use crate::config::FixedPrices;
    use crate::pricing::PriceFilter;
    use crate::test_utils::{
        InMemoryStore, ScriptedChatModel, StaticPriceSource, VALID_REPLY, analysis_settings, insert_message_row,
        insert_session_row, session_with_messages,
    };
    use rust_decimal::Decimal;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(llm_base_url: &str) -> Config {
        let mut config = Config::default();
        config.database.url = Some("postgres://unused".to_string());
        config.llm.base_url = llm_base_url.parse().unwrap();
        config.llm.api_key = Some("sk-test".to_string());
        config.pricing.fixed = Some(FixedPrices {
            input_per_million: Decimal::new(15, 2),
            output_per_million: Decimal::new(60, 2),
        });
        config
    }

    #[tokio::test]
    async fn test_fixed_prices_replace_scraping() {
        let config = test_config("http://localhost:1/v1");
        let source = build_price_source(&config).unwrap();

        let quotes = source.fetch_quotes(&PriceFilter::new("gpt-4o-mini", None)).await.unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].input_per_million, Decimal::new(15, 2));
    }

    #[sqlx::test]
    async fn test_run_once_end_to_end(pool: PgPool) {
        let llm = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "gpt-4o-mini-2024-07-18",
                "choices": [{"message": {"role": "assistant", "content": VALID_REPLY}}],
                "usage": {"prompt_tokens": 200, "completion_tokens": 50}
            })))
            .mount(&llm)
            .await;

        let mut conn = pool.acquire().await.unwrap();
        let session_id = insert_session_row(&mut conn).await;
        insert_message_row(&mut conn, session_id, "Do you have a suite for tonight?", true).await;
        insert_message_row(&mut conn, session_id, "Yes, from $120.", false).await;
        let _empty = insert_session_row(&mut conn).await;
        drop(conn);

        let app = Application::new_with_pool(test_config(&format!("{}/v1", llm.uri())), pool.clone()).unwrap();

        assert_eq!(
            app.run_once().await,
            RunOutcome::Completed(RunSummary {
                selected: 1,
                analyzed: 1,
                failed: 0,
                persisted: 1,
            })
        );
        assert_eq!(app.run_once().await, RunOutcome::CompletedWithNoWork);

        let mut conn = pool.acquire().await.unwrap();
        let stored = db::handlers::Analyses::new(&mut conn)
            .get_by_session(session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.satisfaction, 8);
        assert_eq!(stored.input_tokens, 200);
        assert_eq!(stored.llm_model, "gpt-4o-mini-2024-07-18");
        assert_eq!(stored.total_cost(), Decimal::new(6, 5));
    }

    #[sqlx::test]
    async fn test_shutdown_waits_for_leader_scheduler(pool: PgPool) {
        let store = Arc::new(InMemoryStore::new(vec![session_with_messages(1, &[(true, "late checkout?")])]));
        let analyzer = Arc::new(
            BatchAnalyzer::builder()
                .sessions(store.clone())
                .analyses(store)
                .prices(Arc::new(StaticPriceSource::quote("0.15", "0.60")))
                .client(AnalysisClient::new(Arc::new(
                    ScriptedChatModel::valid().with_delay(Duration::from_secs(30)),
                )))
                .settings(analysis_settings())
                .build(),
        );
        let scheduler = AnalysisScheduler::new(analyzer.clone(), Duration::from_secs(60), true);

        let mut config = Config::default();
        config.leader_election.enabled = true;
        config.leader_election.check_interval = Duration::from_millis(10);

        let services = setup_background_services(pool, &config, scheduler, CancellationToken::new());

        // ours, the one captured by the gain callback, and the running scheduler's
        while Arc::strong_count(&analyzer) < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        services.shutdown().await;

        assert_eq!(Arc::strong_count(&analyzer), 1);
    }
}
