//! The batch analysis pipeline.
//!
//! ```text
//! AnalysisScheduler ── tick ──► BatchAnalyzer::run
//!                                  │ SessionReader::find_eligible_sessions
//!                                  │ PriceSource::fetch_quotes (once)
//!                                  │ per session, bounded concurrency:
//!                                  │   render_transcript → AnalysisClient::analyze → parse_output
//!                                  └ AnalysisWriter::insert_analyses
//! ```

mod client;
mod orchestrator;
pub mod parse;
pub mod prompt;
mod scheduler;

pub use client::AnalysisClient;
pub use orchestrator::{AnalysisSettings, BatchAnalyzer, RunOutcome, RunSummary};
pub use parse::AnalysisResult;
pub use scheduler::AnalysisScheduler;
