use std::sync::Arc;

use tracing::{debug, instrument};

use super::parse::{AnalysisResult, parse_output};
use super::prompt::build_messages;
use crate::errors::Result;
use crate::llm::ChatModel;

/// Sends one transcript to the model with the analysis instructions and validates the reply.
#[derive(Clone)]
pub struct AnalysisClient {
    model: Arc<dyn ChatModel>,
}

impl AnalysisClient {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    #[instrument(skip_all, fields(transcript_len = transcript.len()), err)]
    pub async fn analyze(&self, transcript: &str) -> Result<AnalysisResult> {
        let output = self.model.invoke(&build_messages(transcript)).await?;
        let result = parse_output(&output)?;
        debug!(
            satisfaction = result.satisfaction,
            input_tokens = result.input_tokens,
            output_tokens = result.output_tokens,
            "Analysis parsed"
        );
        Ok(result)
    }
}
