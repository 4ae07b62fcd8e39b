use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::execution::ExecutionAdapter;
use crate::types::side::Side;

#[derive(Debug, Default, Clone, PartialEq)]
struct Staged {
    entry: Option<(String, f64)>,
    close: Option<String>,
}

/// Adapter that only logs what it would have sent.
#[derive(Debug, Default)]
pub struct DryRunAdapter {
    staged: Mutex<Staged>,
}

impl DryRunAdapter {
    fn staged(&self) -> std::sync::MutexGuard<'_, Staged> {
        self.staged
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ExecutionAdapter for DryRunAdapter {
    async fn prepare(&self, currency_pair: &str, quantity: f64) -> Result<()> {
        info!(currency_pair, quantity, "dry run: staging entry");
        self.staged().entry = Some((currency_pair.to_string(), quantity));
        Ok(())
    }

    async fn fire(&self, side: Side, fast_path: bool) -> Result<()> {
        let entry = self.staged().entry.take();

        match entry {
            Some((currency_pair, quantity)) => {
                info!(%side, fast_path, %currency_pair, quantity, "dry run: entry fired");
            }
            None => info!(%side, fast_path, "dry run: entry fired with nothing staged"),
        }
        Ok(())
    }

    async fn prepare_close(&self, currency_pair: &str) -> Result<()> {
        info!(currency_pair, "dry run: staging close");
        self.staged().close = Some(currency_pair.to_string());
        Ok(())
    }

    async fn fire_close(&self, currency_pair: Option<&str>) -> Result<()> {
        let staged = self.staged().close.take();

        match currency_pair {
            Some(currency_pair) => info!(currency_pair, "dry run: position closed"),
            None => info!(staged = ?staged, "dry run: staged positions closed"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fire_consumes_the_staged_entry() {
        let adapter = DryRunAdapter::default();

        adapter.prepare("USD/JPY", 1000.0).await.unwrap();
        assert_eq!(adapter.staged().entry, Some(("USD/JPY".to_string(), 1000.0)));

        adapter.fire(Side::Buy, true).await.unwrap();
        assert_eq!(adapter.staged().entry, None);
    }

    #[tokio::test]
    async fn bulk_close_clears_the_staged_close() {
        let adapter = DryRunAdapter::default();

        adapter.prepare_close("EUR/USD").await.unwrap();
        adapter.fire_close(None).await.unwrap();

        assert_eq!(*adapter.staged(), Staged::default());
        assert!(adapter.fire_close(Some("EUR/USD")).await.is_ok());
    }
}
