pub mod dry_run;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::side::Side;

/// Order-entry surface the dispatch loop drives.
///
/// `prepare` and `prepare_close` stage an order ahead of its trigger time so
/// the matching `fire` call only has to submit it.
#[async_trait]
pub trait ExecutionAdapter {
    async fn prepare(&self, currency_pair: &str, quantity: f64) -> Result<()>;
    async fn fire(&self, side: Side, fast_path: bool) -> Result<()>;
    async fn prepare_close(&self, currency_pair: &str) -> Result<()>;
    /// `None` closes whatever `prepare_close` staged.
    async fn fire_close(&self, currency_pair: Option<&str>) -> Result<()>;
}

pub type DynamicAdapter = Box<dyn ExecutionAdapter + Send + Sync>;
