use std::fmt;

use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;

use crate::types::side::Side;

/// One scheduled entry/exit instruction, independent of the backend it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    pub id: String,
    pub currency_pair: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_time: Option<NaiveDateTime>,
    pub exit_time: Option<NaiveDateTime>,
    pub price: Option<String>,
    pub status: String,
    pub executed: bool,
    pub closed: bool,
}

impl TradeRecord {
    pub fn entry_within(&self, now: NaiveDateTime, tolerance: TimeDelta) -> bool {
        within_window(self.entry_time, now, tolerance)
    }

    pub fn exit_within(&self, now: NaiveDateTime, tolerance: TimeDelta) -> bool {
        within_window(self.exit_time, now, tolerance)
    }
}

fn within_window(trigger: Option<NaiveDateTime>, now: NaiveDateTime, tolerance: TimeDelta) -> bool {
    match trigger {
        Some(at) => (now - at).abs() <= tolerance,
        None => false,
    }
}

impl fmt::Display for TradeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entry = self
            .entry_time
            .map(|at| at.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let exit = self
            .exit_time
            .map(|at| at.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());

        write!(
            f,
            "{} {} {} {} entry={} exit={}",
            self.id, self.currency_pair, self.side, self.quantity, entry, exit
        )
    }
}


#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::fixtures::{at, trade};

    #[test]
    fn window_is_symmetric_and_inclusive() {
        let record = trade("csv_0", Some(at(9, 0, 0)), None);
        let tolerance = TimeDelta::seconds(15);

        assert!(record.entry_within(at(9, 0, 15), tolerance));
        assert!(record.entry_within(at(8, 59, 45), tolerance));
        assert!(!record.entry_within(at(9, 0, 16), tolerance));
        assert!(!record.entry_within(at(8, 59, 44), tolerance));
    }

    #[test]
    fn missing_trigger_is_never_due() {
        let record = trade("csv_0", None, None);

        assert!(!record.entry_within(at(9, 0, 0), TimeDelta::hours(24)));
        assert!(!record.exit_within(at(9, 0, 0), TimeDelta::hours(24)));
    }
}
