//! Turning a raw model reply into a validated [`AnalysisResult`].
//!
//! Models often wrap JSON in a Markdown fence even when told not to, so the fence is stripped
//! before parsing. Anything that is not JSON is `MalformedOutput`; JSON with the wrong shape,
//! an out-of-range score or missing usage metadata is `ValidationFailure`.

use serde::Deserialize;

use crate::db::models::analyses::AnalysisCreateDBRequest;
use crate::errors::{Error, Result};
use crate::llm::{ChatOutput, ResponseMetadata};
use crate::pricing::UnitPrices;
use crate::types::SessionId;

pub const MIN_SATISFACTION: i64 = 0;
pub const MAX_SATISFACTION: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisResult {
    pub satisfaction: i16,
    pub summary: Vec<String>,
    pub improvement: Vec<String>,
    pub output_tokens: i64,
    pub input_tokens: i64,
    pub model_name: String,
}

impl AnalysisResult {
    /// Build the insert request for a session, joining bullet lists with newlines.
    pub fn into_record(self, session_id: SessionId, prices: &UnitPrices) -> AnalysisCreateDBRequest {
        AnalysisCreateDBRequest {
            session_id,
            summary: self.summary.join("\n"),
            improvement: self.improvement.join("\n"),
            satisfaction: self.satisfaction,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            input_tokens_price: prices.input_per_million,
            output_tokens_price: prices.output_per_million,
            llm_model: self.model_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    satisfaction: i64,
    summary: Vec<String>,
    improvement: Vec<String>,
}

struct UsageMetadata {
    input_tokens: i64,
    output_tokens: i64,
    model_name: String,
}

/// Remove an optional leading ```` ``` ```` / ```` ```json ```` fence and a trailing ```` ``` ````.
pub fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let opened = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    opened.strip_suffix("```").unwrap_or(opened).trim()
}

/// Parse possibly-fenced JSON.
pub fn parse_json(content: &str) -> Result<serde_json::Value> {
    serde_json::from_str(strip_code_fence(content)).map_err(|e| Error::MalformedOutput {
        message: format!("{e}"),
    })
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ValidationFailure {
        message: message.into(),
    }
}

fn extract_metadata(metadata: &ResponseMetadata) -> Result<UsageMetadata> {
    let usage = metadata
        .token_usage
        .as_ref()
        .ok_or_else(|| invalid("response metadata has no token usage"))?;
    let input_tokens = usage
        .prompt_tokens
        .ok_or_else(|| invalid("token usage has no prompt_tokens"))?;
    let output_tokens = usage
        .completion_tokens
        .ok_or_else(|| invalid("token usage has no completion_tokens"))?;
    if input_tokens < 0 || output_tokens < 0 {
        return Err(invalid(format!(
            "negative token usage (prompt {input_tokens}, completion {output_tokens})"
        )));
    }
    let model_name = metadata
        .model_name
        .clone()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| invalid("response metadata has no model_name"))?;

    Ok(UsageMetadata {
        input_tokens,
        output_tokens,
        model_name,
    })
}

/// Parse and validate a model reply.
pub fn parse_output(output: &ChatOutput) -> Result<AnalysisResult> {
    let value = parse_json(&output.content)?;
    let metadata = extract_metadata(&output.response_metadata)?;

    let raw: RawAnalysis = serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
    if !(MIN_SATISFACTION..=MAX_SATISFACTION).contains(&raw.satisfaction) {
        return Err(invalid(format!(
            "satisfaction {} outside {MIN_SATISFACTION}..={MAX_SATISFACTION}",
            raw.satisfaction
        )));
    }

    Ok(AnalysisResult {
        // range-checked above
        satisfaction: raw.satisfaction as i16,
        summary: raw.summary,
        improvement: raw.improvement,
        output_tokens: metadata.output_tokens,
        input_tokens: metadata.input_tokens,
        model_name: metadata.model_name,
    })
}
