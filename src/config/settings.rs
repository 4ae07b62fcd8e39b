use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::TimeDelta;
use serde::Deserialize;

use crate::scenario::sources::SourceKind;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub data_source: DataSourceConfig,

    #[serde(default)]
    pub trading: TradingSettings,
}

/// Where the trade schedule lives.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataSourceConfig {
    Excel {
        #[serde(default = "default_excel_path")]
        file_path: PathBuf,
    },
    Csv {
        #[serde(default = "default_csv_path")]
        file_path: PathBuf,

        #[serde(default = "default_encoding")]
        encoding: String,
    },
    GoogleSheets {
        spreadsheet_id: String,

        #[serde(default = "default_sheet_name")]
        sheet_name: String,

        /// Environment variable holding the OAuth bearer token.
        #[serde(default = "default_access_token_env")]
        access_token_env: String,
    },
}

impl DataSourceConfig {
    pub fn kind(&self) -> SourceKind {
        match self {
            DataSourceConfig::Excel { .. } => SourceKind::Excel,
            DataSourceConfig::Csv { .. } => SourceKind::Csv,
            DataSourceConfig::GoogleSheets { .. } => SourceKind::GoogleSheets,
        }
    }
}

fn default_excel_path() -> PathBuf {
    PathBuf::from("data/trade_schedule.xlsx")
}

fn default_csv_path() -> PathBuf {
    PathBuf::from("data/trade_schedule.csv")
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_sheet_name() -> String {
    "Trade Schedule".to_string()
}

fn default_access_token_env() -> String {
    "GOOGLE_SHEETS_ACCESS_TOKEN".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct TradingSettings {
    /// Quantity used when a row leaves it blank.
    pub default_lot_size: Option<f64>,
    pub check_interval_secs: u64,
    pub time_tolerance_secs: u64,
    /// How far ahead entries and exits are pre-staged.
    pub lookahead_secs: u64,
    pub inter_trade_delay_ms: u64,
    pub close_delay_ms: u64,
    pub error_backoff_secs: u64,
    /// Random spread applied to delays, as a fraction of the base delay.
    pub delay_jitter: f64,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            default_lot_size: None,
            check_interval_secs: 30,
            time_tolerance_secs: 15,
            lookahead_secs: 30,
            inter_trade_delay_ms: 1000,
            close_delay_ms: 2000,
            error_backoff_secs: 60,
            delay_jitter: 0.2,
        }
    }
}

impl TradingSettings {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn inter_trade_delay(&self) -> Duration {
        Duration::from_millis(self.inter_trade_delay_ms)
    }

    pub fn close_delay(&self) -> Duration {
        Duration::from_millis(self.close_delay_ms)
    }

    pub fn time_tolerance(&self) -> Result<TimeDelta> {
        seconds_delta(self.time_tolerance_secs, "time_tolerance_secs")
    }

    pub fn lookahead(&self) -> Result<TimeDelta> {
        seconds_delta(self.lookahead_secs, "lookahead_secs")
    }

    fn validate(&self) -> Result<()> {
        if self.check_interval_secs == 0 {
            bail!("check_interval_secs must be > 0");
        }
        if self.error_backoff_secs == 0 {
            bail!("error_backoff_secs must be > 0");
        }
        if !(0.0..1.0).contains(&self.delay_jitter) {
            bail!("delay_jitter must be in [0, 1)");
        }
        if let Some(lot) = self.default_lot_size
            && (lot <= 0.0 || !lot.is_finite())
        {
            bail!("default_lot_size must be > 0");
        }
        self.time_tolerance()?;
        self.lookahead()?;
        Ok(())
    }
}

fn seconds_delta(seconds: u64, name: &str) -> Result<TimeDelta> {
    i64::try_from(seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .with_context(|| format!("{name} is out of range"))
}

impl Settings {
    pub const DEFAULT_PATH: &'static str = "config/settings.yml";

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings {}", path.display()))?;

        Self::from_str(&raw).with_context(|| format!("invalid settings {}", path.display()))
    }

    pub fn from_str(raw: &str) -> Result<Self> {
        let settings: Settings =
            serde_yaml::from_str(raw).context("failed to parse settings yaml")?;

        settings.validate().context("settings validation failed")?;

        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if let DataSourceConfig::GoogleSheets { spreadsheet_id, .. } = &self.data_source
            && spreadsheet_id.trim().is_empty()
        {
            bail!("spreadsheet_id must not be empty");
        }
        self.trading.validate()
    }
}
