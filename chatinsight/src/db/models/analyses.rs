//! Database models for persisted session analyses.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{AnalysisId, SessionId};

/// Number of tokens the per-token prices are quoted against.
pub const PRICE_UNIT_TOKENS: i64 = 1_000_000;

/// Database request for creating an analysis row.
///
/// `created_at` is assigned by the database at insert time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisCreateDBRequest {
    pub session_id: SessionId,
    pub summary: String,
    pub improvement: String,
    pub satisfaction: i16,
    pub input_tokens: i64,
    pub output_tokens: i64,
    /// USD per one million input tokens
    pub input_tokens_price: Decimal,
    /// USD per one million output tokens
    pub output_tokens_price: Decimal,
    pub llm_model: String,
}

impl AnalysisCreateDBRequest {
    /// Cost of the prompt side of the call.
    pub fn input_cost(&self) -> Decimal {
        token_cost(self.input_tokens, self.input_tokens_price)
    }

    /// Cost of the completion side of the call.
    pub fn output_cost(&self) -> Decimal {
        token_cost(self.output_tokens, self.output_tokens_price)
    }

    pub fn total_cost(&self) -> Decimal {
        self.input_cost() + self.output_cost()
    }
}

/// Database response for a persisted analysis.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Analysis {
    pub id: AnalysisId,
    pub session_id: SessionId,
    pub summary: String,
    pub improvement: String,
    pub satisfaction: i16,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub input_tokens_price: Decimal,
    pub output_tokens_price: Decimal,
    pub llm_model: String,
    pub created_at: DateTime<Utc>,
}

impl Analysis {
    pub fn total_cost(&self) -> Decimal {
        token_cost(self.input_tokens, self.input_tokens_price) + token_cost(self.output_tokens, self.output_tokens_price)
    }
}

/// `tokens * price_per_million / 1_000_000`, exact in decimal arithmetic.
pub fn token_cost(tokens: i64, price_per_million: Decimal) -> Decimal {
    Decimal::from(tokens) * price_per_million / Decimal::from(PRICE_UNIT_TOKENS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn request(input_tokens: i64, output_tokens: i64, input_price: &str, output_price: &str) -> AnalysisCreateDBRequest {
        AnalysisCreateDBRequest {
            session_id: 1,
            summary: String::new(),
            improvement: String::new(),
            satisfaction: 5,
            input_tokens,
            output_tokens,
            input_tokens_price: Decimal::from_str(input_price).unwrap(),
            output_tokens_price: Decimal::from_str(output_price).unwrap(),
            llm_model: "gpt-4o-mini".to_string(),
        }
    }

    #[test]
    fn test_two_million_tokens_at_one_dollar_cost_two_dollars() {
        let record = request(2_000_000, 0, "1.00", "0");

        assert_eq!(record.input_cost(), Decimal::from_str("2.00").unwrap());
        assert_eq!(record.output_cost(), Decimal::ZERO);
    }

    #[test]
    fn test_costs_do_not_drift_when_summed() {
        // 0.15 / 0.60 per million is the gpt-4o-mini list price; small per-call costs are where
        // binary floating point drifts
        let record = request(1234, 87, "0.15", "0.60");
        let total: Decimal = (0..10_000).map(|_| record.total_cost()).sum();

        let expected_per_record = Decimal::from_str("0.0002373").unwrap();
        assert_eq!(record.total_cost(), expected_per_record);
        assert_eq!(total, Decimal::from_str("2.373").unwrap());
    }

    #[test]
    fn test_zero_prices_cost_nothing() {
        let record = request(5_000, 280, "0", "0");
        assert_eq!(record.total_cost(), Decimal::ZERO);
    }
}
