use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;
use tracing::{error, info};

use crate::source::{LoadError, SourceBackend};
use crate::types::trade::TradeRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleSummary {
    pub total: usize,
    pub executed: usize,
    pub closed: usize,
    pub pending: usize,
}

/// Loaded trade records in source row order, queried by time window.
#[derive(Debug, Clone, Default)]
pub struct ScheduleIndex {
    records: Vec<TradeRecord>,
}

impl ScheduleIndex {
    pub fn from_records(records: Vec<TradeRecord>) -> Self {
        Self { records }
    }

    pub async fn try_load(source: &mut (dyn SourceBackend + Send + Sync)) -> Result<Self, LoadError> {
        let records = source.read().await?;
        let index = Self::from_records(records);

        info!(source = %source.kind(), summary = ?index.summary(), "schedule loaded");

        Ok(index)
    }

    /// Like [`Self::try_load`], but a failed read yields an empty index.
    pub async fn load(source: &mut (dyn SourceBackend + Send + Sync)) -> Self {
        let kind = source.kind();

        match Self::try_load(source).await {
            Ok(index) => index,
            Err(error) => {
                error!(source = %kind, %error, "schedule load failed, continuing with an empty schedule");
                Self::default()
            }
        }
    }

    /// Unexecuted trades whose entry time lies within `tolerance` of `now`.
    pub fn get_due_for_entry(&self, now: NaiveDateTime, tolerance: TimeDelta) -> Vec<&TradeRecord> {
        self.records
            .iter()
            .filter(|trade| !trade.executed && trade.entry_within(now, tolerance))
            .collect()
    }

    /// Executed, still open trades whose exit time lies within `tolerance` of `now`.
    pub fn get_due_for_exit(&self, now: NaiveDateTime, tolerance: TimeDelta) -> Vec<&TradeRecord> {
        self.records
            .iter()
            .filter(|trade| trade.executed && !trade.closed && trade.exit_within(now, tolerance))
            .collect()
    }

    /// Every trade with an exit time inside the window, whatever its flags say.
    pub fn get_exits_within(&self, now: NaiveDateTime, tolerance: TimeDelta) -> Vec<&TradeRecord> {
        self.records
            .iter()
            .filter(|trade| trade.exit_within(now, tolerance))
            .collect()
    }

    pub fn summary(&self) -> ScheduleSummary {
        let total = self.records.len();
        let executed = self.records.iter().filter(|trade| trade.executed).count();
        let closed = self.records.iter().filter(|trade| trade.closed).count();

        ScheduleSummary {
            total,
            executed,
            closed,
            pending: total - executed,
        }
    }

    pub fn records(&self) -> &[TradeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use async_trait::async_trait;

    use super::*;
    use crate::scenario::sources::SourceKind;
    use crate::source::row_parser::RowRejection;
    use crate::types::trade::fixtures::{at, trade};

    fn ids(trades: Vec<&TradeRecord>) -> Vec<&str> {
        trades.into_iter().map(|trade| trade.id.as_str()).collect()
    }

    fn tolerance() -> TimeDelta {
        TimeDelta::seconds(15)
    }

    fn index() -> ScheduleIndex {
        let mut done = trade("csv_1", Some(at(9, 0, 0)), Some(at(9, 30, 0)));
        done.executed = true;

        let mut closed = trade("csv_2", Some(at(8, 0, 0)), Some(at(9, 30, 5)));
        closed.executed = true;
        closed.closed = true;

        ScheduleIndex::from_records(vec![
            trade("csv_0", Some(at(9, 0, 0)), Some(at(9, 30, 0))),
            done,
            closed,
            trade("csv_3", Some(at(9, 0, 10)), None),
            trade("csv_4", None, Some(at(9, 30, 0))),
        ])
    }

    #[test]
    fn entry_window_is_inclusive_and_symmetric() {
        let index = index();

        assert_eq!(ids(index.get_due_for_entry(at(9, 0, 0), tolerance())), vec!["csv_0", "csv_3"]);
        assert_eq!(ids(index.get_due_for_entry(at(8, 59, 45), tolerance())), vec!["csv_0"]);
        assert_eq!(ids(index.get_due_for_entry(at(9, 0, 15), tolerance())), vec!["csv_0", "csv_3"]);
        assert_eq!(ids(index.get_due_for_entry(at(9, 0, 16), tolerance())), vec!["csv_3"]);
        assert!(index.get_due_for_entry(at(8, 59, 44), tolerance()).is_empty());
    }

    #[test]
    fn exits_respect_flags_unless_asked_not_to() {
        let index = index();

        assert_eq!(ids(index.get_due_for_exit(at(9, 30, 0), tolerance())), vec!["csv_1"]);
        assert_eq!(
            ids(index.get_exits_within(at(9, 30, 0), tolerance())),
            vec!["csv_0", "csv_1", "csv_2", "csv_4"]
        );
    }

    #[test]
    fn summary_counts_flags() {
        assert_eq!(
            index().summary(),
            ScheduleSummary {
                total: 5,
                executed: 2,
                closed: 1,
                pending: 3,
            }
        );
        assert_eq!(ScheduleIndex::default().summary(), ScheduleSummary::default());
    }

    struct StubSource {
        result: Option<Result<Vec<TradeRecord>, LoadError>>,
    }

    #[async_trait]
    impl SourceBackend for StubSource {
        fn kind(&self) -> SourceKind {
            SourceKind::Csv
        }

        async fn read(&mut self) -> Result<Vec<TradeRecord>, LoadError> {
            self.result.take().unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn mark_executed(&mut self, _trade_id: &str) -> bool {
            false
        }

        async fn mark_closed(&mut self, _trade_id: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn failed_load_yields_an_empty_index() {
        let mut source = StubSource {
            result: Some(Err(LoadError::Rejected {
                row: 3,
                reason: RowRejection::MissingCurrencyPair,
            })),
        };

        assert!(ScheduleIndex::load(&mut source).await.is_empty());
    }

    #[tokio::test]
    async fn try_load_surfaces_the_error() {
        let mut source = StubSource {
            result: Some(Err(anyhow!("disk on fire").into())),
        };

        assert!(matches!(
            ScheduleIndex::try_load(&mut source).await,
            Err(LoadError::Source(_))
        ));
    }

    #[tokio::test]
    async fn load_keeps_source_order() {
        let mut source = StubSource {
            result: Some(Ok(index().records().to_vec())),
        };

        let loaded = ScheduleIndex::load(&mut source).await;

        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded.records()[0].id, "csv_0");
    }
}
