//! Test doubles and fixtures shared by unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use url::Url;

use crate::analysis::AnalysisSettings;
use crate::config::{LlmConfig, PricingFallback};
use crate::db::errors::{DbError, Result as DbResult};
use crate::db::models::analyses::AnalysisCreateDBRequest;
use crate::db::models::sessions::{Message, Session};
use crate::errors::{Error, Result};
use crate::llm::{ChatMessage, ChatModel, ChatOutput, ResponseMetadata, TokenUsage};
use crate::pricing::{ModelPriceQuote, PriceFilter, PriceSource};
use crate::store::{AnalysisWriter, SessionReader};
use crate::types::SessionId;

pub const TEST_MODEL: &str = "gpt-4o-mini";

/// A well-formed fenced reply, as models usually send it.
pub const VALID_REPLY: &str = r#"```json
{
    "satisfaction": 8,
    "summary": ["- The guest asked about suite prices.", "- The chatbot answered with the price list."],
    "improvement": ["- Offer a booking link.", "- Answer faster."]
}
```"#;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 4, 12, 0, 0).single().unwrap_or_default()
}

/// A message in session 1 created `secs` seconds after a fixed instant.
pub fn message_at(id: i64, secs: i64, remote: bool, content: &str) -> Message {
    Message {
        id,
        session_id: 1,
        content: content.to_string(),
        remote,
        created_at: base_time() + chrono::Duration::seconds(secs),
    }
}

/// A session whose messages are one second apart in the given order.
pub fn session_with_messages(id: SessionId, messages: &[(bool, &str)]) -> Session {
    Session {
        id,
        created_at: base_time(),
        messages: messages
            .iter()
            .enumerate()
            .map(|(index, (remote, content))| Message {
                session_id: id,
                ..message_at(id * 1000 + index as i64, index as i64, *remote, content)
            })
            .collect(),
    }
}

pub fn chat_output(content: &str, input_tokens: i64, output_tokens: i64) -> ChatOutput {
    ChatOutput {
        content: content.to_string(),
        response_metadata: ResponseMetadata {
            token_usage: Some(TokenUsage {
                prompt_tokens: Some(input_tokens),
                completion_tokens: Some(output_tokens),
            }),
            model_name: Some(TEST_MODEL.to_string()),
        },
    }
}

pub fn llm_config(base_url: Url) -> LlmConfig {
    LlmConfig {
        base_url,
        api_key: Some("sk-test".to_string()),
        request_timeout: Duration::from_secs(5),
        ..LlmConfig::default()
    }
}

pub fn analysis_settings() -> AnalysisSettings {
    AnalysisSettings {
        model_id: TEST_MODEL.to_string(),
        provider: None,
        max_concurrency: 4,
        max_sessions_per_run: None,
        on_pricing_unavailable: PricingFallback::Abort,
    }
}

enum ScriptedReply {
    Content(String),
    Fail,
}

/// Chat model answering from a script keyed on transcript markers.
pub struct ScriptedChatModel {
    default_reply: String,
    rules: Vec<(String, ScriptedReply)>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedChatModel {
    pub fn always(reply: &str) -> Self {
        Self {
            default_reply: reply.to_string(),
            rules: Vec::new(),
            delay: None,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Replies with [`VALID_REPLY`] unless a rule matches.
    pub fn valid() -> Self {
        Self::always(VALID_REPLY)
    }

    pub fn replying_for(mut self, marker: &str, reply: &str) -> Self {
        self.rules.push((marker.to_string(), ScriptedReply::Content(reply.to_string())));
        self
    }

    /// Fail with a provider error when the transcript contains `marker`.
    pub fn failing_for(mut self, marker: &str) -> Self {
        self.rules.push((marker.to_string(), ScriptedReply::Fail));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<ChatOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        let rule = self.rules.iter().find(|(marker, _)| prompt.contains(marker.as_str()));

        match rule {
            Some((_, ScriptedReply::Fail)) => Err(Error::Llm {
                message: "500 Internal Server Error: scripted failure".to_string(),
                status: Some(500),
            }),
            Some((_, ScriptedReply::Content(reply))) => Ok(chat_output(reply, 120, 40)),
            None => Ok(chat_output(&self.default_reply, 120, 40)),
        }
    }
}

enum PriceBehavior {
    Quotes(Vec<ModelPriceQuote>),
    Unavailable,
}

/// Price source with canned behavior that counts lookups.
pub struct StaticPriceSource {
    behavior: PriceBehavior,
    calls: AtomicUsize,
}

impl StaticPriceSource {
    pub fn quote(input_per_million: &str, output_per_million: &str) -> Self {
        let quote = ModelPriceQuote {
            provider: "OpenAI".to_string(),
            model_id: TEST_MODEL.to_string(),
            input_per_million: input_per_million.parse::<Decimal>().unwrap_or_default(),
            output_per_million: output_per_million.parse::<Decimal>().unwrap_or_default(),
        };
        Self {
            behavior: PriceBehavior::Quotes(vec![quote]),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self {
            behavior: PriceBehavior::Quotes(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            behavior: PriceBehavior::Unavailable,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    async fn fetch_quotes(&self, filter: &PriceFilter) -> Result<Vec<ModelPriceQuote>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            PriceBehavior::Quotes(quotes) => Ok(quotes
                .iter()
                .filter(|q| filter.matches_model(&q.model_id) && filter.matches_provider(&q.provider))
                .cloned()
                .collect()),
            PriceBehavior::Unavailable => Err(Error::SourceUnavailable {
                message: "connection refused".to_string(),
            }),
        }
    }
}

/// Session/analysis store kept in memory, with the same eligibility rules as PostgreSQL.
#[derive(Default)]
pub struct InMemoryStore {
    sessions: Mutex<Vec<Session>>,
    analyses: Mutex<Vec<AnalysisCreateDBRequest>>,
    fail_reads: bool,
    fail_writes: bool,
    insert_calls: AtomicUsize,
}

impl InMemoryStore {
    pub fn new(sessions: Vec<Session>) -> Self {
        Self {
            sessions: Mutex::new(sessions),
            ..Self::default()
        }
    }

    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn analyses(&self) -> Vec<AnalysisCreateDBRequest> {
        self.analyses.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

fn store_failure(operation: &str) -> DbError {
    DbError::Other(anyhow::anyhow!("{operation}: connection reset by peer"))
}

#[async_trait]
impl SessionReader for InMemoryStore {
    async fn find_eligible_sessions(&self, limit: Option<i64>) -> DbResult<Vec<Session>> {
        if self.fail_reads {
            return Err(store_failure("select sessions"));
        }

        let analyzed: Vec<SessionId> = self.analyses().iter().map(|a| a.session_id).collect();
        let sessions = self.sessions.lock().map_err(|_| store_failure("lock sessions"))?;
        let limit = limit.map(|l| l as usize).unwrap_or(usize::MAX);

        Ok(sessions
            .iter()
            .filter(|s| !s.messages.is_empty() && !analyzed.contains(&s.id))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AnalysisWriter for InMemoryStore {
    async fn insert_analyses(&self, records: &[AnalysisCreateDBRequest]) -> DbResult<u64> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes {
            return Err(store_failure("insert analyses"));
        }

        let mut analyses = self.analyses.lock().map_err(|_| store_failure("lock analyses"))?;
        let mut inserted = 0;
        for record in records {
            if analyses.iter().all(|a| a.session_id != record.session_id) {
                analyses.push(record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

pub async fn insert_session_row(conn: &mut PgConnection) -> SessionId {
    sqlx::query_scalar::<_, SessionId>("INSERT INTO session DEFAULT VALUES RETURNING id")
        .fetch_one(conn)
        .await
        .expect("insert session")
}

pub async fn insert_message_row(conn: &mut PgConnection, session_id: SessionId, content: &str, remote: bool) {
    sqlx::query("INSERT INTO message (session_id, content, remote) VALUES ($1, $2, $3)")
        .bind(session_id)
        .bind(content)
        .bind(remote)
        .execute(conn)
        .await
        .expect("insert message");
}

pub async fn insert_analysis_row(conn: &mut PgConnection, session_id: SessionId) {
    sqlx::query(
        "INSERT INTO analysis (session_id, summary, improvement, satisfaction, input_tokens, output_tokens, llm_model)
         VALUES ($1, '', '', 5, 1, 1, $2)",
    )
    .bind(session_id)
    .bind(TEST_MODEL)
    .execute(conn)
    .await
    .expect("insert analysis");
}
