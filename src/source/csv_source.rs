use std::borrow::Cow;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::Local;
use encoding_rs::{Encoding, SHIFT_JIS, UTF_8};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::scenario::sources::SourceKind;
use crate::source::columns::{ColumnMap, Field};
use crate::source::row_parser::{TRUTHY_TOKEN, TradeRowParser};
use crate::source::{LoadError, SourceBackend, records_from_rows};
use crate::types::trade::TradeRecord;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const FALLBACK_ENCODINGS: &[&str] = &["utf-8-sig", "cp932", "shift_jis", "utf-8"];

/// A text encoding the file was successfully decoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextEncoding {
    encoding: &'static Encoding,
    bom: bool,
}

impl TextEncoding {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "utf-8-sig" | "utf_8_sig" => Some(Self {
                encoding: UTF_8,
                bom: true,
            }),
            "cp932" | "ms932" | "windows-31j" | "shift_jis" | "sjis" => Some(Self {
                encoding: SHIFT_JIS,
                bom: false,
            }),
            other => Encoding::for_label(other.as_bytes()).map(|encoding| Self {
                encoding,
                bom: false,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        if self.bom { "utf-8-sig" } else { self.encoding.name() }
    }

    fn decode<'a>(&self, bytes: &'a [u8]) -> Option<Cow<'a, str>> {
        let bytes = if self.encoding == UTF_8 {
            bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
        } else {
            bytes
        };

        self.encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
    }

    /// UTF-8 keeps the byte order mark the file actually carries.
    fn observed_in(self, bytes: &[u8]) -> Self {
        if self.encoding == UTF_8 {
            Self {
                bom: bytes.starts_with(UTF8_BOM),
                ..self
            }
        } else {
            self
        }
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>> {
        let (encoded, _, had_errors) = self.encoding.encode(text);
        if had_errors {
            bail!("text is not representable in {}", self.name());
        }

        let mut bytes = Vec::with_capacity(encoded.len() + UTF8_BOM.len());
        if self.bom {
            bytes.extend_from_slice(UTF8_BOM);
        }
        bytes.extend_from_slice(&encoded);

        Ok(bytes)
    }
}

/// Header plus data rows of a delimited file.
#[derive(Debug, Clone)]
struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn parse(text: &str) -> Result<Self> {
        let text = text.trim_start_matches('\u{feff}');
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .context("failed to read csv header")?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.context("failed to read csv record")?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self { headers, rows })
    }

    fn to_text(&self) -> Result<String> {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(Vec::new());

        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|error| anyhow!("failed to flush csv writer: {error}"))?;

        Ok(String::from_utf8(bytes)?)
    }
}

/// Delimited text file backend.
///
/// Write-back copies the current file to `<stem>_backup.csv` and writes the
/// updated table to the original path in the encoding detected on read.
#[derive(Debug)]
pub struct CsvSource {
    path: PathBuf,
    encoding: String,
    parser: TradeRowParser,
    detected: Option<TextEncoding>,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>, encoding: impl Into<String>, parser: TradeRowParser) -> Self {
        Self {
            path: path.into(),
            encoding: encoding.into(),
            parser,
            detected: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn detected_encoding(&self) -> Option<TextEncoding> {
        self.detected
    }

    pub fn backup_path(&self) -> PathBuf {
        sibling_with_suffix(&self.path, "_backup")
    }

    /// Candidate encodings in the order they are tried, configured one first.
    fn candidates(&self) -> Vec<TextEncoding> {
        let mut candidates: Vec<TextEncoding> = Vec::new();
        let labels = std::iter::once(self.encoding.as_str()).chain(FALLBACK_ENCODINGS.iter().copied());

        for label in labels {
            match TextEncoding::from_label(label) {
                Some(candidate) if !candidates.contains(&candidate) => candidates.push(candidate),
                Some(_) => {}
                None => warn!(encoding = label, "unknown text encoding, skipping"),
            }
        }

        candidates
    }

    async fn load_table(&self) -> Result<(Table, TextEncoding)> {
        let bytes = fs::read(&self.path)
            .await
            .with_context(|| format!("failed to read {}", self.path.display()))?;

        if let Some(known) = self.detected {
            let text = known
                .decode(&bytes)
                .ok_or_else(|| anyhow!("{} no longer decodes as {}", self.path.display(), known.name()))?;

            return Ok((Table::parse(&text)?, known));
        }

        for candidate in self.candidates() {
            let Some(text) = candidate.decode(&bytes) else {
                debug!(encoding = candidate.name(), "csv does not decode, trying next encoding");
                continue;
            };

            match Table::parse(&text) {
                Ok(table) if ColumnMap::resolve(&table.headers).has(Field::CurrencyPair) => {
                    return Ok((table, candidate.observed_in(&bytes)));
                }
                Ok(_) => {
                    debug!(encoding = candidate.name(), "no recognizable header, trying next encoding");
                }
                Err(error) => {
                    warn!(encoding = candidate.name(), error = %error, "csv parse failed, trying next encoding");
                }
            }
        }

        bail!(
            "{} could not be read with any supported encoding",
            self.path.display()
        )
    }

    fn staging_path(&self) -> PathBuf {
        sibling_with_suffix(&self.path, "_writing")
    }

    /// Sets a flag cell. The current file is copied to the backup first and the
    /// new contents replace the original by rename, so a failed write leaves the
    /// original intact.
    async fn update_flag(&mut self, trade_id: &str, field: Field) -> Result<()> {
        let index = SourceKind::Csv
            .row_index(trade_id)
            .ok_or_else(|| anyhow!("not a csv trade id: {trade_id}"))?;

        let (mut table, encoding) = self.load_table().await?;
        let column = ColumnMap::resolve(&table.headers)
            .position(field)
            .ok_or_else(|| anyhow!("column {:?} not found", field.aliases()))?;

        let row = table
            .rows
            .get_mut(index)
            .ok_or_else(|| anyhow!("row {index} out of range"))?;
        if row.len() <= column {
            row.resize(column + 1, String::new());
        }
        row[column] = TRUTHY_TOKEN.to_string();

        let bytes = encoding.encode(&table.to_text()?)?;
        let staging = self.staging_path();

        fs::copy(&self.path, self.backup_path())
            .await
            .with_context(|| format!("failed to back up {}", self.path.display()))?;
        fs::write(&staging, bytes)
            .await
            .with_context(|| format!("failed to write {}", staging.display()))?;
        fs::rename(&staging, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;

        self.detected = Some(encoding);

        Ok(())
    }

    async fn mark(&mut self, trade_id: &str, field: Field) -> bool {
        match self.update_flag(trade_id, field).await {
            Ok(()) => {
                info!(trade_id, column = field.aliases()[0], "csv flag updated");
                true
            }
            Err(error) => {
                error!(trade_id, error = %format!("{error:#}"), "csv flag update failed");
                false
            }
        }
    }
}

#[async_trait]
impl SourceBackend for CsvSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Csv
    }

    async fn read(&mut self) -> Result<Vec<TradeRecord>, LoadError> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            error!(path = %self.path.display(), "csv file not found");
            return Err(anyhow!("csv file not found: {}", self.path.display()).into());
        }

        let (table, encoding) = self.load_table().await.map_err(|error| {
            error!(error = %format!("{error:#}"), "csv load failed");
            LoadError::from(error)
        })?;
        self.detected = Some(encoding);

        let columns = ColumnMap::resolve(&table.headers);
        let today = Local::now().date_naive();
        let records = records_from_rows(self.kind(), &columns, &table.rows, self.parser, today)?;

        info!(count = records.len(), encoding = encoding.name(), "csv loaded");

        Ok(records)
    }

    async fn mark_executed(&mut self, trade_id: &str) -> bool {
        self.mark(trade_id, Field::Executed).await
    }

    async fn mark_closed(&mut self, trade_id: &str) -> bool {
        self.mark(trade_id, Field::Closed).await
    }
}

/// `dir/name.ext` to `dir/name<suffix>.ext`.
pub(crate) fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    let file_name = match path.extension() {
        Some(extension) => format!("{stem}{suffix}.{}", extension.to_string_lossy()),
        None => format!("{stem}{suffix}"),
    };

    path.with_file_name(file_name)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::source::row_parser::RowRejection;

    const JAPANESE_CSV: &str = "通貨ペア,方向,数量,エントリー時刻,クローズ時刻,実行済み,決済済み\n\
                                USD/JPY,買い,1000,09:00:00,09:30:00,no,no\n\
                                EUR/JPY,売り,,10:00,,no,no\n";

    fn write(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[tokio::test]
    async fn reads_utf8_with_byte_order_mark() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(JAPANESE_CSV.as_bytes());
        let path = write(&dir, "schedule.csv", &bytes);

        let mut source = CsvSource::new(path, "utf-8", TradeRowParser::new(Some(500.0)));
        let records = source.read().await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "csv_0");
        assert_eq!(records[1].quantity, 500.0);
        assert_eq!(source.detected_encoding().unwrap().name(), "utf-8-sig");
    }

    #[tokio::test]
    async fn write_back_keeps_the_byte_order_mark() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(JAPANESE_CSV.as_bytes());
        let path = write(&dir, "schedule.csv", &bytes);

        let mut source = CsvSource::new(&path, "utf-8", TradeRowParser::new(Some(500.0)));
        source.read().await.unwrap();

        assert!(source.mark_closed("csv_0").await);

        let written = fs::read(&path).unwrap();
        assert!(written.starts_with(UTF8_BOM));
        assert!(!written[UTF8_BOM.len()..].starts_with(UTF8_BOM));
        assert!(String::from_utf8_lossy(&written).contains("USD/JPY,買い,1000,09:00:00,09:30:00,no,yes"));
        assert!(!source.staging_path().exists());
    }

    #[tokio::test]
    async fn plain_utf8_stays_without_byte_order_mark() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "schedule.csv", JAPANESE_CSV.as_bytes());

        let mut source = CsvSource::new(&path, "utf-8", TradeRowParser::new(Some(500.0)));
        source.read().await.unwrap();
        assert!(source.mark_executed("csv_0").await);

        assert!(!fs::read(&path).unwrap().starts_with(UTF8_BOM));
        assert_eq!(source.detected_encoding().unwrap().name(), "UTF-8");
    }

    #[tokio::test]
    async fn failed_write_back_leaves_the_original_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "schedule.csv", JAPANESE_CSV.as_bytes());

        let mut source = CsvSource::new(&path, "utf-8", TradeRowParser::new(Some(500.0)));
        source.read().await.unwrap();

        fs::create_dir(source.staging_path()).unwrap();

        assert!(!source.mark_executed("csv_0").await);
        assert_eq!(fs::read(&path).unwrap(), JAPANESE_CSV.as_bytes());

        let records = source.read().await.unwrap();
        assert!(!records[0].executed);
    }

    #[tokio::test]
    async fn falls_back_to_shift_jis() {
        let dir = tempfile::tempdir().unwrap();
        let (encoded, _, _) = SHIFT_JIS.encode(JAPANESE_CSV);
        let path = write(&dir, "schedule.csv", &encoded);

        let mut source = CsvSource::new(path, "utf-8", TradeRowParser::new(Some(500.0)));
        let records = source.read().await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].currency_pair, "USD/JPY");
        assert_eq!(source.detected_encoding().unwrap().name(), "Shift_JIS");
    }

    #[tokio::test]
    async fn missing_file_is_a_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = CsvSource::new(dir.path().join("absent.csv"), "utf-8", TradeRowParser::default());

        assert!(matches!(source.read().await, Err(LoadError::Source(_))));
    }

    #[tokio::test]
    async fn invalid_row_fails_the_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "schedule.csv",
            "通貨ペア,方向,数量,エントリー時刻\n,buy,1000,09:00:00\n".as_bytes(),
        );

        let mut source = CsvSource::new(path, "utf-8", TradeRowParser::new(Some(1000.0)));

        match source.read().await {
            Err(LoadError::Rejected { row: 0, reason }) => {
                assert_eq!(reason, RowRejection::MissingCurrencyPair)
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mark_executed_rotates_backup_and_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let (encoded, _, _) = SHIFT_JIS.encode(JAPANESE_CSV);
        let path = write(&dir, "schedule.csv", &encoded);

        let mut source = CsvSource::new(&path, "cp932", TradeRowParser::new(Some(500.0)));
        source.read().await.unwrap();

        assert!(source.mark_executed("csv_1").await);
        assert!(source.backup_path().exists());
        assert!(path.exists());
        assert_eq!(fs::read(source.backup_path()).unwrap(), encoded.to_vec());

        let mut reloaded = CsvSource::new(&path, "cp932", TradeRowParser::new(Some(500.0)));
        let records = reloaded.read().await.unwrap();

        assert!(!records[0].executed);
        assert!(records[1].executed);
        assert!(!records[1].closed);
    }

    #[tokio::test]
    async fn mark_fails_for_foreign_ids_and_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "schedule.csv", "currency_pair,quantity\nUSD/JPY,1\n".as_bytes());

        let mut source = CsvSource::new(&path, "utf-8", TradeRowParser::default());
        source.read().await.unwrap();

        assert!(!source.mark_executed("excel_0").await);
        assert!(!source.mark_closed("csv_0").await);
        assert!(!source.mark_executed("csv_9").await);
    }

    #[test]
    fn sibling_paths_keep_the_extension() {
        assert_eq!(
            sibling_with_suffix(Path::new("data/trades.csv"), "_backup"),
            PathBuf::from("data/trades_backup.csv")
        );
        assert_eq!(
            sibling_with_suffix(Path::new("data/trades.xlsx"), "_updated"),
            PathBuf::from("data/trades_updated.xlsx")
        );
    }
}
