use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use calamine::{Data, Reader, Xlsx, open_workbook};
use chrono::Local;
use rust_xlsxwriter::Workbook;
use tokio::task;
use tracing::{error, info, warn};

use crate::scenario::sources::SourceKind;
use crate::source::columns::{ColumnMap, Field};
use crate::source::csv_source::sibling_with_suffix;
use crate::source::row_parser::{TRUTHY_TOKEN, TradeRowParser};
use crate::source::{LoadError, SourceBackend, records_from_rows};
use crate::types::trade::TradeRecord;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// First worksheet of a workbook, rendered as text.
#[derive(Debug, Clone)]
struct Sheet {
    name: String,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// Local `.xlsx` backend.
///
/// Write-back never touches the source workbook: the updated sheet is saved to
/// `<stem>_updated.xlsx`, which later reads prefer when present.
#[derive(Debug)]
pub struct ExcelSource {
    path: PathBuf,
    parser: TradeRowParser,
    sheet: Option<Sheet>,
}

impl ExcelSource {
    pub fn new(path: impl Into<PathBuf>, parser: TradeRowParser) -> Self {
        Self {
            path: path.into(),
            parser,
            sheet: None,
        }
    }

    pub fn updated_path(&self) -> PathBuf {
        sibling_with_suffix(&self.path, "_updated")
    }

    /// The companion when it is at least as new as the source workbook.
    /// A source edited after the last write-back wins.
    fn read_path(&self) -> Result<PathBuf> {
        let updated = self.updated_path();
        let Ok(updated_meta) = fs::metadata(&updated) else {
            return Ok(self.path.clone());
        };

        let source_modified = fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .with_context(|| format!("failed to stat {}", self.path.display()))?;
        let updated_modified = updated_meta
            .modified()
            .with_context(|| format!("failed to stat {}", updated.display()))?;

        if updated_modified >= source_modified {
            Ok(updated)
        } else {
            warn!(
                source = %self.path.display(),
                stale = %updated.display(),
                "source workbook is newer than its updated copy, reading the source"
            );
            Ok(self.path.clone())
        }
    }

    fn load_sheet(path: &Path) -> Result<Sheet> {
        let mut workbook = open_workbook::<Xlsx<_>, _>(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        let name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("{} has no worksheets", path.display()))?;

        let range = workbook
            .worksheet_range(&name)
            .with_context(|| format!("failed to read worksheet {name}"))?;

        let mut rows = range
            .rows()
            .map(|row| row.iter().map(render_cell).collect::<Vec<String>>());

        let headers = rows.next().unwrap_or_default();
        let rows = rows.collect();

        Ok(Sheet { name, headers, rows })
    }

    async fn load_current(&self) -> Result<(PathBuf, Sheet)> {
        let path = self.read_path()?;
        let read_from = path.clone();
        let sheet = task::spawn_blocking(move || Self::load_sheet(&read_from)).await??;

        Ok((path, sheet))
    }

    fn save_sheet(sheet: &Sheet, path: &Path) -> Result<()> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&sheet.name)?;

        let all_rows = std::iter::once(&sheet.headers).chain(sheet.rows.iter());
        for (row_number, row) in all_rows.enumerate() {
            let row_number = u32::try_from(row_number)?;

            for (column, cell) in row.iter().enumerate() {
                let column = u16::try_from(column)?;

                if cell.is_empty() {
                    continue;
                }

                match cell.parse::<f64>() {
                    Ok(number) if row_number > 0 && number.is_finite() => {
                        worksheet.write_number(row_number, column, number)?;
                    }
                    _ => {
                        worksheet.write_string(row_number, column, cell)?;
                    }
                }
            }
        }

        workbook
            .save(path)
            .with_context(|| format!("failed to save {}", path.display()))?;

        Ok(())
    }

    async fn update_flag(&mut self, trade_id: &str, field: Field) -> Result<()> {
        let index = SourceKind::Excel
            .row_index(trade_id)
            .ok_or_else(|| anyhow!("not an excel trade id: {trade_id}"))?;

        let updated_path = self.updated_path();
        let sheet = self
            .sheet
            .as_mut()
            .ok_or_else(|| anyhow!("workbook has not been loaded"))?;

        let column = ColumnMap::resolve(&sheet.headers)
            .position(field)
            .ok_or_else(|| anyhow!("column {:?} not found", field.aliases()))?;

        let row = sheet
            .rows
            .get_mut(index)
            .ok_or_else(|| anyhow!("row {index} out of range"))?;
        if row.len() <= column {
            row.resize(column + 1, String::new());
        }
        row[column] = TRUTHY_TOKEN.to_string();

        let sheet = sheet.clone();
        task::spawn_blocking(move || Self::save_sheet(&sheet, &updated_path)).await?
    }

    async fn mark(&mut self, trade_id: &str, field: Field) -> bool {
        match self.update_flag(trade_id, field).await {
            Ok(()) => {
                info!(trade_id, column = field.aliases()[0], path = %self.updated_path().display(), "excel flag updated");
                true
            }
            Err(error) => {
                error!(trade_id, error = %format!("{error:#}"), "excel flag update failed");
                false
            }
        }
    }
}

#[async_trait]
impl SourceBackend for ExcelSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Excel
    }

    async fn read(&mut self) -> Result<Vec<TradeRecord>, LoadError> {
        if !self.path.exists() {
            error!(path = %self.path.display(), "excel file not found");
            return Err(anyhow!("excel file not found: {}", self.path.display()).into());
        }

        let (path, sheet) = self.load_current().await.map_err(|error| {
            error!(error = %format!("{error:#}"), "excel load failed");
            LoadError::from(error)
        })?;

        let columns = ColumnMap::resolve(&sheet.headers);
        let today = Local::now().date_naive();
        let records = records_from_rows(self.kind(), &columns, &sheet.rows, self.parser, today)?;

        info!(count = records.len(), path = %path.display(), "excel loaded");
        self.sheet = Some(sheet);

        Ok(records)
    }

    async fn mark_executed(&mut self, trade_id: &str) -> bool {
        self.mark(trade_id, Field::Executed).await
    }

    async fn mark_closed(&mut self, trade_id: &str) -> bool {
        self.mark(trade_id, Field::Closed).await
    }
}

fn render_cell(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(text) => text.clone(),
        Data::Int(value) => value.to_string(),
        Data::Float(value) => render_number(*value),
        Data::Bool(true) => TRUTHY_TOKEN.to_string(),
        Data::Bool(false) => "no".to_string(),
        Data::DateTime(serial) => time_from_serial(serial.as_f64()),
        Data::DateTimeIso(text) => match text.split_once('T') {
            Some((_, time)) => time.to_string(),
            None => text.clone(),
        },
        other => other.to_string(),
    }
}

fn render_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Time-of-day part of an Excel serial date as `HH:MM:SS`.
fn time_from_serial(serial: f64) -> String {
    let seconds = (serial.fract() * SECONDS_PER_DAY).round() as u32 % 86_400;

    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
