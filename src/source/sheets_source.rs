use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Local;
use tracing::{error, info};

use crate::scenario::sources::SourceKind;
use crate::source::columns::{ColumnMap, Field};
use crate::source::row_parser::{TRUTHY_TOKEN, TradeRowParser};
use crate::source::sheets_client::{SheetsApi, a1_range, column_letters};
use crate::source::{LoadError, SourceBackend, records_from_rows};
use crate::types::trade::TradeRecord;

/// Remote spreadsheet backend. The first row of the sheet is the header and
/// each flag update is a single cell write.
pub struct SheetsSource<A> {
    api: A,
    sheet_name: String,
    parser: TradeRowParser,
    headers: Option<Vec<String>>,
}

impl<A: SheetsApi> SheetsSource<A> {
    pub fn new(api: A, sheet_name: impl Into<String>, parser: TradeRowParser) -> Self {
        Self {
            api,
            sheet_name: sheet_name.into(),
            parser,
            headers: None,
        }
    }

    async fn header_row(&mut self) -> Result<Vec<String>> {
        if let Some(headers) = &self.headers {
            return Ok(headers.clone());
        }

        let range = a1_range(&self.sheet_name, "1:1");
        let headers = self.api.values(&range).await?.into_iter().next().unwrap_or_default();
        self.headers = Some(headers.clone());

        Ok(headers)
    }

    /// A1 reference of the flag cell for a trade: data rows start below the header.
    async fn flag_cell(&mut self, trade_id: &str, field: Field) -> Result<String> {
        let index = SourceKind::GoogleSheets
            .row_index(trade_id)
            .ok_or_else(|| anyhow!("not a sheets trade id: {trade_id}"))?;

        let headers = self.header_row().await?;
        let column = ColumnMap::resolve(&headers)
            .position(field)
            .ok_or_else(|| anyhow!("column {:?} not found", field.aliases()))?;

        let reference = format!("{}{}", column_letters(column), index + 2);

        Ok(a1_range(&self.sheet_name, &reference))
    }

    async fn mark(&mut self, trade_id: &str, field: Field) -> bool {
        let result = match self.flag_cell(trade_id, field).await {
            Ok(range) => self
                .api
                .update_cell(&range, TRUTHY_TOKEN)
                .await
                .map(|()| range),
            Err(error) => Err(error),
        };

        match result {
            Ok(range) => {
                info!(trade_id, %range, "sheets flag updated");
                true
            }
            Err(error) => {
                error!(trade_id, error = %format!("{error:#}"), "sheets flag update failed");
                false
            }
        }
    }
}

#[async_trait]
impl<A: SheetsApi> SourceBackend for SheetsSource<A> {
    fn kind(&self) -> SourceKind {
        SourceKind::GoogleSheets
    }

    async fn read(&mut self) -> Result<Vec<TradeRecord>, LoadError> {
        let range = a1_range(&self.sheet_name, "A:ZZ");
        let mut rows = self.api.values(&range).await.map_err(|error| {
            error!(error = %format!("{error:#}"), "sheets load failed");
            LoadError::from(error)
        })?;

        if rows.is_empty() {
            return Err(anyhow!("sheet {} is empty", self.sheet_name).into());
        }

        let headers = rows.remove(0);

        let columns = ColumnMap::resolve(&headers);
        let today = Local::now().date_naive();
        let records = records_from_rows(self.kind(), &columns, &rows, self.parser, today)?;

        info!(count = records.len(), sheet = %self.sheet_name, "sheets loaded");
        self.headers = Some(headers);

        Ok(records)
    }

    async fn mark_executed(&mut self, trade_id: &str) -> bool {
        self.mark(trade_id, Field::Executed).await
    }

    async fn mark_closed(&mut self, trade_id: &str) -> bool {
        self.mark(trade_id, Field::Closed).await
    }
}
