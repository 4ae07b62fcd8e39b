use anyhow::Result;

use crate::{
    config::settings::DataSourceConfig,
    execution::{DynamicAdapter, dry_run::DryRunAdapter},
    source::{
        DynamicSource, csv_source::CsvSource, excel_source::ExcelSource,
        row_parser::TradeRowParser,
        sheets_client::{SheetsClient, SheetsCredentials},
        sheets_source::SheetsSource,
    },
};

pub struct Scenario;

impl Scenario {
    pub fn source(config: &DataSourceConfig, parser: TradeRowParser) -> Result<DynamicSource> {
        tracing::info!(source = %config.kind(), "creating data source");

        let source: DynamicSource = match config {
            DataSourceConfig::Excel { file_path } => {
                Box::new(ExcelSource::new(file_path.clone(), parser))
            }
            DataSourceConfig::Csv {
                file_path,
                encoding,
            } => Box::new(CsvSource::new(file_path.clone(), encoding.clone(), parser)),
            DataSourceConfig::GoogleSheets {
                spreadsheet_id,
                sheet_name,
                access_token_env,
            } => {
                let credentials = SheetsCredentials::from_env(access_token_env)?;
                let client = SheetsClient::new(spreadsheet_id.clone(), credentials);

                Box::new(SheetsSource::new(client, sheet_name.clone(), parser))
            }
        };

        Ok(source)
    }

    pub fn adapter() -> DynamicAdapter {
        tracing::info!(adapter = "dry-run", "creating execution adapter");

        Box::new(DryRunAdapter::default())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::scenario::sources::SourceKind;

    #[test]
    fn builds_the_configured_file_backend() {
        let excel = DataSourceConfig::Excel {
            file_path: PathBuf::from("schedule.xlsx"),
        };
        let csv = DataSourceConfig::Csv {
            file_path: PathBuf::from("schedule.csv"),
            encoding: "cp932".to_string(),
        };

        let parser = TradeRowParser::default();

        assert_eq!(Scenario::source(&excel, parser).unwrap().kind(), SourceKind::Excel);
        assert_eq!(Scenario::source(&csv, parser).unwrap().kind(), SourceKind::Csv);
    }

    #[test]
    fn sheets_backend_requires_a_token() {
        let config = DataSourceConfig::GoogleSheets {
            spreadsheet_id: "1AbC".to_string(),
            sheet_name: "Trade Schedule".to_string(),
            access_token_env: "TRADE_SCHEDULER_TEST_TOKEN_THAT_IS_NEVER_SET".to_string(),
        };

        let error = Scenario::source(&config, TradeRowParser::default())
            .err()
            .unwrap();

        assert!(error.to_string().contains("TRADE_SCHEDULER_TEST_TOKEN_THAT_IS_NEVER_SET"));
    }
}
