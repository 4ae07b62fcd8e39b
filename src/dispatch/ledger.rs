use std::collections::HashMap;

use tracing::debug;

/// Progress of a single trade through the dispatch loop. Ordered: a trade only
/// ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TradeState {
    #[default]
    Pending,
    PreStaged,
    Fired,
    ClosePreStaged,
    Closed,
}

/// In-memory record of what has been dispatched in this process. It starts
/// empty whatever the source flags say; write-back failures never roll it back.
#[derive(Debug, Default, Clone)]
pub struct DispatchLedger {
    states: HashMap<String, TradeState>,
}

impl DispatchLedger {
    pub fn state(&self, trade_id: &str) -> TradeState {
        self.states.get(trade_id).copied().unwrap_or_default()
    }

    /// Moves `trade_id` to `next`. Backward moves are ignored and reported as `false`.
    pub fn advance(&mut self, trade_id: &str, next: TradeState) -> bool {
        let current = self.state(trade_id);
        if next <= current {
            debug!(trade_id, ?current, ?next, "ignoring backward transition");
            return false;
        }

        self.states.insert(trade_id.to_string(), next);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_only_move_forward() {
        let mut ledger = DispatchLedger::default();

        assert_eq!(ledger.state("csv_0"), TradeState::Pending);
        assert!(ledger.advance("csv_0", TradeState::PreStaged));
        assert!(ledger.advance("csv_0", TradeState::Fired));
        assert!(!ledger.advance("csv_0", TradeState::PreStaged));
        assert!(!ledger.advance("csv_0", TradeState::Fired));
        assert_eq!(ledger.state("csv_0"), TradeState::Fired);
    }
}
