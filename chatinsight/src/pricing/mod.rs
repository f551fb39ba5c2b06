//! Token prices for the configured model.
//!
//! Prices come from a [`PriceSource`]: either the public pricing page scraped by
//! [`HtmlPriceTable`] or a [`FixedPriceSource`] built from configuration. All amounts are
//! USD per 1,000,000 tokens and stay in decimal arithmetic end to end.

mod source;
mod table;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

pub use source::{FixedPriceSource, HtmlPriceTable};
pub use table::parse_price_table;

/// One row of the pricing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPriceQuote {
    pub provider: String,
    pub model_id: String,
    /// USD per 1,000,000 input tokens
    pub input_per_million: Decimal,
    /// USD per 1,000,000 output tokens
    pub output_per_million: Decimal,
}

/// Filters applied to table rows. `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceFilter {
    pub model_id: Option<String>,
    pub provider: Option<String>,
}

impl PriceFilter {
    pub fn new(model_id: impl Into<String>, provider: Option<String>) -> Self {
        Self {
            model_id: Some(model_id.into()),
            provider,
        }
    }

    pub fn matches_provider(&self, provider: &str) -> bool {
        self.provider.as_deref().is_none_or(|wanted| wanted == provider)
    }

    pub fn matches_model(&self, model_id: &str) -> bool {
        self.model_id.as_deref().is_none_or(|wanted| wanted == model_id)
    }
}

/// The two prices attached to every record of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitPrices {
    pub input_per_million: Decimal,
    pub output_per_million: Decimal,
}

impl UnitPrices {
    pub fn zero() -> Self {
        Self::default()
    }
}

impl From<&ModelPriceQuote> for UnitPrices {
    fn from(quote: &ModelPriceQuote) -> Self {
        Self {
            input_per_million: quote.input_per_million,
            output_per_million: quote.output_per_million,
        }
    }
}

/// Fetches the current quotes matching a filter.
///
/// Implementations return `SourceUnavailable` when the source cannot be reached. A source whose
/// layout could not be read yields `Ok` with an empty list.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_quotes(&self, filter: &PriceFilter) -> Result<Vec<ModelPriceQuote>>;
}
