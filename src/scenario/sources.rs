use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum SourceKind {
    Excel,
    Csv,
    #[clap(name = "google-sheets")]
    GoogleSheets,
}

impl SourceKind {
    /// Prefix of the trade ids minted by this backend.
    pub fn id_prefix(self) -> &'static str {
        match self {
            Self::Excel => "excel",
            Self::Csv => "csv",
            Self::GoogleSheets => "gsheets",
        }
    }

    /// Recovers the 0-based data row from an id minted by this backend.
    pub fn row_index(self, trade_id: &str) -> Option<usize> {
        trade_id
            .strip_prefix(self.id_prefix())?
            .strip_prefix('_')?
            .parse()
            .ok()
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Excel => write!(f, "excel"),
            Self::Csv => write!(f, "csv"),
            Self::GoogleSheets => write!(f, "google-sheets"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "excel" | "xlsx" => Ok(Self::Excel),
            "csv" => Ok(Self::Csv),
            "google-sheets" | "google_sheets" | "gsheets" => Ok(Self::GoogleSheets),
            other => Err(anyhow!("unknown data source kind: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_index_round_trips_through_ids() {
        assert_eq!(SourceKind::Csv.row_index("csv_12"), Some(12));
        assert_eq!(SourceKind::GoogleSheets.row_index("gsheets_0"), Some(0));
        assert_eq!(SourceKind::Csv.row_index("excel_3"), None);
        assert_eq!(SourceKind::Excel.row_index("excel_x"), None);
    }

    #[test]
    fn parses_configuration_spellings() {
        assert_eq!("google_sheets".parse::<SourceKind>().unwrap(), SourceKind::GoogleSheets);
        assert_eq!("EXCEL".parse::<SourceKind>().unwrap(), SourceKind::Excel);
        assert!("parquet".parse::<SourceKind>().is_err());
    }
}
