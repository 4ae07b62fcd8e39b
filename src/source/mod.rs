pub mod columns;
pub mod csv_source;
pub mod excel_source;
pub mod row_parser;
pub mod sheets_client;
pub mod sheets_source;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::scenario::sources::SourceKind;
use crate::source::columns::ColumnMap;
use crate::source::row_parser::{RowRejection, TradeRowParser};
use crate::types::trade::TradeRecord;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("row {row} rejected: {reason}")]
    Rejected { row: usize, reason: RowRejection },

    #[error("source unavailable: {0:#}")]
    Source(#[from] anyhow::Error),
}

/// A storage medium trade schedules are read from and completion flags are
/// written back to.
///
/// `read` never yields a partially validated list. The `mark_*` calls report
/// failure as `false`; callers keep their own record of completion.
#[async_trait]
pub trait SourceBackend: Send {
    fn kind(&self) -> SourceKind;
    async fn read(&mut self) -> Result<Vec<TradeRecord>, LoadError>;
    async fn mark_executed(&mut self, trade_id: &str) -> bool;
    async fn mark_closed(&mut self, trade_id: &str) -> bool;
}

pub type DynamicSource = Box<dyn SourceBackend + Send + Sync>;

/// Validates every data row under `columns`, failing on the first rejection.
///
/// Blank rows are skipped but still count towards row positions, so ids keep
/// pointing at the physical row they were read from.
pub fn records_from_rows<S: AsRef<str>>(
    kind: SourceKind,
    columns: &ColumnMap,
    rows: &[Vec<S>],
    parser: TradeRowParser,
    today: NaiveDate,
) -> Result<Vec<TradeRecord>, LoadError> {
    rows.iter()
        .enumerate()
        .filter(|(row, cells)| {
            let blank = cells.iter().all(|cell| cell.as_ref().trim().is_empty());
            if blank {
                tracing::debug!(source = %kind, row, "blank row skipped");
            }
            !blank
        })
        .map(|(row, cells)| {
            parser
                .parse(&columns.row(cells), row, kind.id_prefix(), today)
                .map_err(|reason| {
                    tracing::error!(source = %kind, row, %reason, "row rejected, aborting load");
                    LoadError::Rejected { row, reason }
                })
        })
        .collect()
}
