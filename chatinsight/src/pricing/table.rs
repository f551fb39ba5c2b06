//! Reading quotes out of the pricing page's HTML table.
//!
//! Body rows are laid out as `[provider, model, context, input price, output price]`. The model
//! cell holds the id in a `div` on current versions of the page; older versions only link to
//! `/models/<id>/`, and plain text is the last resort.

use std::str::FromStr;

use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;

use super::{ModelPriceQuote, PriceFilter};
use crate::errors::{Error, Result};

const PROVIDER_CELL: usize = 0;
const MODEL_CELL: usize = 1;
const INPUT_PRICE_CELL: usize = 3;
const OUTPUT_PRICE_CELL: usize = 4;
const MIN_CELLS: usize = 5;

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::Internal {
        operation: format!("parse selector `{css}`: {e}"),
    })
}

fn mismatch(reason: impl Into<String>) -> Error {
    Error::SchemaMismatch { reason: reason.into() }
}

fn cell_text(cell: &ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

fn model_id(cell: &ElementRef<'_>, div: &Selector, link: &Selector) -> String {
    if let Some(id) = cell.select(div).next().map(|d| cell_text(&d)).filter(|id| !id.is_empty()) {
        return id;
    }

    if let Some(href) = cell.select(link).next().and_then(|a| a.value().attr("href")) {
        return href.split('/').nth(2).unwrap_or_default().trim().to_string();
    }

    cell_text(cell)
}

fn parse_price(raw: &str, column: &str, row: usize) -> Result<Decimal> {
    let cleaned = raw.replace('$', "");
    Decimal::from_str(cleaned.trim())
        .map_err(|e| mismatch(format!("row {row}: {column} price {raw:?} is not a decimal: {e}")))
}

/// Parse the first table of `html` into quotes matching `filter`.
///
/// Rows narrower than the price layout (section banners, `colspan` notes) are skipped, unless
/// the filter names a model and the row's model cell matches it. Returns `SchemaMismatch` when
/// there is no table or body, when no row has the full layout, or when a matching row's price
/// does not parse. Rows without `td` cells are ignored.
pub fn parse_price_table(html: &str, filter: &PriceFilter) -> Result<Vec<ModelPriceQuote>> {
    let table_selector = selector("table")?;
    let body_selector = selector("tbody")?;
    let row_selector = selector("tr")?;
    let cell_selector = selector("td")?;
    let div_selector = selector("div")?;
    let link_selector = selector("a[href]")?;

    let document = Html::parse_document(html);
    let table = document
        .select(&table_selector)
        .next()
        .ok_or_else(|| mismatch("no table found"))?;
    let body = table
        .select(&body_selector)
        .next()
        .ok_or_else(|| mismatch("table has no body"))?;

    let mut quotes = Vec::new();
    let mut priced_rows = 0usize;
    let mut short_rows = 0usize;
    for (index, row) in body.select(&row_selector).enumerate() {
        let cells: Vec<ElementRef<'_>> = row.select(&cell_selector).collect();
        if cells.is_empty() {
            continue;
        }

        if cells.len() < MIN_CELLS {
            let names_wanted_model = filter.model_id.is_some()
                && cells.len() > MODEL_CELL
                && filter.matches_provider(&cell_text(&cells[PROVIDER_CELL]))
                && filter.matches_model(&model_id(&cells[MODEL_CELL], &div_selector, &link_selector));
            if names_wanted_model {
                return Err(mismatch(format!(
                    "row {index} names the requested model but has {} cells, expected at least {MIN_CELLS}",
                    cells.len()
                )));
            }
            warn!(row = index, cells = cells.len(), "Skipping pricing row without price columns");
            short_rows += 1;
            continue;
        }
        priced_rows += 1;

        let provider = cell_text(&cells[PROVIDER_CELL]);
        if !filter.matches_provider(&provider) {
            continue;
        }

        let model_id = model_id(&cells[MODEL_CELL], &div_selector, &link_selector);
        if !filter.matches_model(&model_id) {
            continue;
        }

        quotes.push(ModelPriceQuote {
            provider,
            model_id,
            input_per_million: parse_price(&cell_text(&cells[INPUT_PRICE_CELL]), "input", index)?,
            output_per_million: parse_price(&cell_text(&cells[OUTPUT_PRICE_CELL]), "output", index)?,
        });
    }

    if priced_rows == 0 && short_rows > 0 {
        return Err(mismatch(format!(
            "none of {short_rows} rows has at least {MIN_CELLS} cells"
        )));
    }

    Ok(quotes)
}
