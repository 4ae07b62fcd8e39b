use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{NaiveDateTime, TimeDelta};
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::settings::TradingSettings;
use crate::dispatch::clock::Clock;
use crate::dispatch::ledger::{DispatchLedger, TradeState};
use crate::execution::DynamicAdapter;
use crate::schedule::schedule_index::ScheduleIndex;
use crate::source::DynamicSource;
use crate::types::trade::TradeRecord;

const MIN_JITTERED_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchConfig {
    pub check_interval: Duration,
    pub error_backoff: Duration,
    pub tolerance: TimeDelta,
    pub lookahead: TimeDelta,
    pub inter_trade_delay: Duration,
    pub close_delay: Duration,
    pub delay_jitter: f64,
}

impl DispatchConfig {
    pub fn from_settings(settings: &TradingSettings) -> Result<Self> {
        Ok(Self {
            check_interval: settings.check_interval(),
            error_backoff: settings.error_backoff(),
            tolerance: settings.time_tolerance()?,
            lookahead: settings.lookahead()?,
            inter_trade_delay: settings.inter_trade_delay(),
            close_delay: settings.close_delay(),
            delay_jitter: settings.delay_jitter,
        })
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub prestaged: usize,
    pub fired: usize,
    pub close_prestaged: usize,
    pub closed: usize,
    pub failures: usize,
}

/// Polls the schedule and drives the execution adapter, firing each trade at
/// most once per process.
pub struct DispatchLoop {
    index: ScheduleIndex,
    source: DynamicSource,
    adapter: DynamicAdapter,
    ledger: DispatchLedger,
    config: DispatchConfig,
    clock: Box<dyn Clock + Send + Sync>,
}

impl DispatchLoop {
    pub fn new(
        index: ScheduleIndex,
        source: DynamicSource,
        adapter: DynamicAdapter,
        config: DispatchConfig,
        clock: Box<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            index,
            source,
            adapter,
            ledger: DispatchLedger::default(),
            config,
            clock,
        }
    }

    pub fn state(&self, trade_id: &str) -> TradeState {
        self.ledger.state(trade_id)
    }

    /// Runs until `shutdown` turns true or its sender goes away.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            trades = self.index.len(),
            interval = ?self.config.check_interval,
            "dispatch loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let wait = if self.index.is_empty() {
                info!("no trades scheduled");
                self.config.check_interval
            } else {
                let now = self.clock.now();
                match self.tick(now).await {
                    Ok(report) => {
                        info!(%now, ?report, "schedule check complete");
                        self.config.check_interval
                    }
                    Err(error) => {
                        error!(%now, error = %format!("{error:#}"), "schedule check failed, backing off");
                        self.config.error_backoff
                    }
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        warn!("shutdown sender dropped");
                        break;
                    }
                }
            }
        }

        info!("dispatch loop stopped");
    }

    /// One pass over the schedule at `now`: pre-stage entries, fire entries,
    /// pre-stage exits, fire exits.
    pub async fn tick(&mut self, now: NaiveDateTime) -> Result<TickReport> {
        let ahead = now
            .checked_add_signed(self.config.lookahead)
            .ok_or_else(|| anyhow!("lookahead from {now} is out of range"))?;

        let mut report = TickReport::default();

        self.prestage_entries(ahead, &mut report).await;
        self.fire_entries(now, &mut report).await;
        self.prestage_exits(ahead, &mut report).await;
        self.fire_exits(now, &mut report).await;

        Ok(report)
    }

    fn due_entries(&self, at: NaiveDateTime) -> Vec<TradeRecord> {
        self.index
            .get_due_for_entry(at, self.config.tolerance)
            .into_iter()
            .cloned()
            .collect()
    }

    fn due_exits(&self, at: NaiveDateTime) -> Vec<TradeRecord> {
        self.index
            .get_exits_within(at, self.config.tolerance)
            .into_iter()
            .cloned()
            .collect()
    }

    async fn prestage_entries(&mut self, ahead: NaiveDateTime, report: &mut TickReport) {
        for trade in self.due_entries(ahead) {
            if self.ledger.state(&trade.id) != TradeState::Pending {
                continue;
            }

            info!(trade_id = %trade.id, pair = %trade.currency_pair, "pre-staging entry");
            match self.adapter.prepare(&trade.currency_pair, trade.quantity).await {
                Ok(()) => {
                    self.ledger.advance(&trade.id, TradeState::PreStaged);
                    report.prestaged += 1;
                }
                Err(error) => {
                    error!(trade_id = %trade.id, error = %format!("{error:#}"), "entry pre-stage failed");
                    report.failures += 1;
                }
            }
        }
    }

    async fn fire_entries(&mut self, now: NaiveDateTime, report: &mut TickReport) {
        let mut attempted = false;

        for trade in self.due_entries(now) {
            let state = self.ledger.state(&trade.id);
            if state >= TradeState::Fired {
                debug!(trade_id = %trade.id, ?state, "entry already fired");
                continue;
            }

            if attempted {
                self.pause(self.config.inter_trade_delay).await;
            }
            attempted = true;

            let result = if state == TradeState::PreStaged {
                self.adapter.fire(trade.side, true).await
            } else {
                match self.adapter.prepare(&trade.currency_pair, trade.quantity).await {
                    Ok(()) => self.adapter.fire(trade.side, false).await,
                    Err(error) => Err(error),
                }
            };

            match result {
                Ok(()) => {
                    self.ledger.advance(&trade.id, TradeState::Fired);
                    report.fired += 1;
                    info!(trade = %trade, fast_path = state == TradeState::PreStaged, "entry fired");

                    if !self.source.mark_executed(&trade.id).await {
                        warn!(trade_id = %trade.id, "executed flag not written back");
                    }
                }
                Err(error) => {
                    error!(trade_id = %trade.id, error = %format!("{error:#}"), "entry failed");
                    report.failures += 1;
                }
            }
        }
    }

    async fn prestage_exits(&mut self, ahead: NaiveDateTime, report: &mut TickReport) {
        for trade in self.due_exits(ahead) {
            if self.ledger.state(&trade.id) != TradeState::Fired {
                continue;
            }

            info!(trade_id = %trade.id, pair = %trade.currency_pair, "pre-staging close");
            match self.adapter.prepare_close(&trade.currency_pair).await {
                Ok(()) => {
                    self.ledger.advance(&trade.id, TradeState::ClosePreStaged);
                    report.close_prestaged += 1;
                }
                Err(error) => {
                    error!(trade_id = %trade.id, error = %format!("{error:#}"), "close pre-stage failed");
                    report.failures += 1;
                }
            }
        }
    }

    async fn fire_exits(&mut self, now: NaiveDateTime, report: &mut TickReport) {
        let mut attempted = false;

        for trade in self.due_exits(now) {
            let state = self.ledger.state(&trade.id);
            if !matches!(state, TradeState::Fired | TradeState::ClosePreStaged) {
                debug!(trade_id = %trade.id, ?state, "not eligible for close");
                continue;
            }

            if attempted {
                self.pause(self.config.close_delay).await;
            }
            attempted = true;

            let result = if state == TradeState::ClosePreStaged {
                self.adapter.fire_close(None).await
            } else {
                self.adapter.fire_close(Some(&trade.currency_pair)).await
            };

            match result {
                Ok(()) => {
                    self.ledger.advance(&trade.id, TradeState::Closed);
                    report.closed += 1;
                    info!(trade = %trade, "position closed");

                    if !self.source.mark_closed(&trade.id).await {
                        warn!(trade_id = %trade.id, "closed flag not written back");
                    }
                }
                Err(error) => {
                    error!(trade_id = %trade.id, error = %format!("{error:#}"), "close failed");
                    report.failures += 1;
                }
            }
        }
    }

    async fn pause(&self, base: Duration) {
        let delay = jittered(base, self.config.delay_jitter);
        debug!(?delay, "pausing between orders");
        tokio::time::sleep(delay).await;
    }
}

/// `base` spread by up to `jitter` of itself either way, floored at 100 ms.
/// A zero `jitter` leaves `base` untouched.
fn jittered(base: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return base;
    }

    let base_secs = base.as_secs_f64();
    let spread = base_secs * jitter;
    let offset = rand::rng().random_range(-spread..=spread);

    Duration::from_secs_f64((base_secs + offset).max(0.0)).max(MIN_JITTERED_DELAY)
}
