use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;
use tracing::{info, warn};

use crate::source::columns::{Field, RawRow};
use crate::types::{side::Side, trade::TradeRecord};

/// Why a row cannot become a trade. Any of these aborts the whole load.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowRejection {
    #[error("currency pair is missing")]
    MissingCurrencyPair,

    #[error("quantity is missing and no default lot size is configured")]
    MissingQuantity,

    #[error("invalid quantity: {0:?}")]
    InvalidQuantity(String),

    #[error("quantity must be positive: {0}")]
    NonPositiveQuantity(f64),
}

/// Converts raw rows into [`TradeRecord`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct TradeRowParser {
    default_lot_size: Option<f64>,
}

impl TradeRowParser {
    pub fn new(default_lot_size: Option<f64>) -> Self {
        Self { default_lot_size }
    }

    pub fn parse<S: AsRef<str>>(
        &self,
        row: &RawRow<'_, S>,
        index: usize,
        id_prefix: &str,
        today: NaiveDate,
    ) -> Result<TradeRecord, RowRejection> {
        let currency_pair = currency_pair(row.get(Field::CurrencyPair))?;
        let quantity = self.quantity(row.get(Field::Quantity), index)?;

        Ok(TradeRecord {
            id: format!("{id_prefix}_{index}"),
            currency_pair,
            side: side(row.get_or_default(Field::Side).unwrap_or_default(), index),
            quantity,
            entry_time: time_field(row.get(Field::EntryTime), today, index),
            exit_time: time_field(row.get(Field::ExitTime), today, index),
            price: row
                .get(Field::Price)
                .map(str::trim)
                .filter(|price| !is_blank(price))
                .map(str::to_string),
            status: row
                .get_or_default(Field::Status)
                .map(|status| status.trim().to_lowercase())
                .unwrap_or_default(),
            executed: is_truthy(row.get_or_default(Field::Executed)),
            closed: is_truthy(row.get_or_default(Field::Closed)),
        })
    }

    fn quantity(&self, raw: Option<&str>, index: usize) -> Result<f64, RowRejection> {
        let raw = raw.map(str::trim).unwrap_or_default();

        if is_blank(raw) {
            return match self.default_lot_size {
                Some(default) => {
                    info!(row = index, default_lot_size = default, "quantity empty, using default lot size");
                    Ok(default)
                }
                None => Err(RowRejection::MissingQuantity),
            };
        }

        let quantity: f64 = raw
            .replace(',', "")
            .parse()
            .map_err(|_| RowRejection::InvalidQuantity(raw.to_string()))?;

        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(RowRejection::NonPositiveQuantity(quantity));
        }

        Ok(quantity)
    }
}

/// Token written back for a completed flag.
pub const TRUTHY_TOKEN: &str = "yes";

fn is_truthy(raw: Option<&str>) -> bool {
    raw.map(|value| value.trim().eq_ignore_ascii_case(TRUTHY_TOKEN))
        .unwrap_or(false)
}

fn is_blank(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan")
}

fn currency_pair(raw: Option<&str>) -> Result<String, RowRejection> {
    match raw.map(str::trim) {
        Some(pair) if !is_blank(pair) => Ok(pair.to_string()),
        _ => Err(RowRejection::MissingCurrencyPair),
    }
}

fn side(raw: &str, index: usize) -> Side {
    match Side::normalize(raw) {
        Some(side) => side,
        None => {
            warn!(row = index, raw, "unrecognized side, treating as buy");
            Side::Buy
        }
    }
}

fn time_field(raw: Option<&str>, today: NaiveDate, index: usize) -> Option<NaiveDateTime> {
    let raw = raw?.trim();
    if is_blank(raw) {
        return None;
    }

    match parse_time_of_day(raw) {
        Some(time) => Some(today.and_time(time)),
        None => {
            warn!(row = index, raw, "unparsable time, event will not trigger");
            None
        }
    }
}

/// Parses `H:MM`, `H:MM:SS` or `HH:MM:SS`.
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let parts: Vec<&str> = raw.trim().split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }

    let hour: u32 = parts[0].trim().parse().ok()?;
    let minute: u32 = parts[1].trim().parse().ok()?;
    let second: u32 = match parts.get(2) {
        Some(second) => second.trim().parse().ok()?,
        None => 0,
    };

    NaiveTime::from_hms_opt(hour, minute, second)
}
