use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{ModelPriceQuote, PriceFilter, PriceSource, parse_price_table};
use crate::errors::{Error, Result};

/// Scrapes quotes from a public HTML pricing page.
pub struct HtmlPriceTable {
    client: Client,
    url: Url,
}

impl HtmlPriceTable {
    pub fn new(url: Url, request_timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: crate::http::client(request_timeout)?,
            url,
        })
    }

    async fn fetch_html(&self) -> Result<String> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| Error::SourceUnavailable {
                message: format!("GET {}: {e}", self.url),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::SourceUnavailable {
                message: format!("GET {} returned {status}", self.url),
            });
        }

        response.text().await.map_err(|e| Error::SourceUnavailable {
            message: format!("reading body of {}: {e}", self.url),
        })
    }
}

#[async_trait]
impl PriceSource for HtmlPriceTable {
    #[instrument(skip(self), fields(url = %self.url), err)]
    async fn fetch_quotes(&self, filter: &PriceFilter) -> Result<Vec<ModelPriceQuote>> {
        let html = self.fetch_html().await?;

        match parse_price_table(&html, filter) {
            Ok(quotes) => {
                debug!(count = quotes.len(), "Parsed pricing table");
                Ok(quotes)
            }
            Err(Error::SchemaMismatch { reason }) => {
                warn!(%reason, "Pricing page layout not recognised, no quotes available");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

/// Serves a single configured quote regardless of what is published online.
#[derive(Debug, Clone)]
pub struct FixedPriceSource {
    input_per_million: Decimal,
    output_per_million: Decimal,
}

impl FixedPriceSource {
    pub fn new(input_per_million: Decimal, output_per_million: Decimal) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }
}

#[async_trait]
impl PriceSource for FixedPriceSource {
    async fn fetch_quotes(&self, filter: &PriceFilter) -> Result<Vec<ModelPriceQuote>> {
        Ok(vec![ModelPriceQuote {
            provider: filter.provider.clone().unwrap_or_else(|| "fixed".to_string()),
            model_id: filter.model_id.clone().unwrap_or_default(),
            input_per_million: self.input_per_million,
            output_per_million: self.output_per_million,
        }])
    }
}
