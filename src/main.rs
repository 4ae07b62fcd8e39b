use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trade_scheduler::config::settings::Settings;
use trade_scheduler::dispatch::clock::LocalClock;
use trade_scheduler::dispatch::dispatch_loop::{DispatchConfig, DispatchLoop};
use trade_scheduler::scenario::scenario::Scenario;
use trade_scheduler::scenario::sources::SourceKind;
use trade_scheduler::schedule::schedule_index::ScheduleIndex;
use trade_scheduler::source::row_parser::TradeRowParser;

const INSPECT_PREVIEW: usize = 5;

#[derive(Debug, Clone, Parser)]
struct Args {
    #[arg(long, default_value = Settings::DEFAULT_PATH)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Dispatch scheduled trades through the dry-run adapter until Ctrl-C.
    Run,
    /// Load the schedule once and log what was found.
    Inspect {
        /// Fail unless the configured source is of this kind.
        #[arg(long, value_enum)]
        expect: Option<SourceKind>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("trade_scheduler=info".parse()?)
                .add_directive("trade_scheduler::dispatch=debug".parse()?),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    let settings = Settings::from_file(&args.config)?;
    let parser = TradeRowParser::new(settings.trading.default_lot_size);
    let mut source = Scenario::source(&settings.data_source, parser)?;

    match args.command.unwrap_or(Command::Run) {
        Command::Inspect { expect } => {
            if let Some(expected) = expect
                && expected != source.kind()
            {
                bail!("configured source is {}, expected {expected}", source.kind());
            }

            let index = ScheduleIndex::try_load(source.as_mut()).await?;
            info!(summary = ?index.summary(), "schedule summary");

            for trade in index.records().iter().take(INSPECT_PREVIEW) {
                info!(%trade);
            }
        }
        Command::Run => {
            let config = DispatchConfig::from_settings(&settings.trading)?;
            let index = ScheduleIndex::load(source.as_mut()).await;
            if index.is_empty() {
                warn!("no trades loaded, the loop will idle until stopped");
            }

            let (shutdown_sender, shutdown) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl+C, initiating shutdown");
                    let _ = shutdown_sender.send(true);
                }
            });

            let mut dispatch = DispatchLoop::new(
                index,
                source,
                Scenario::adapter(),
                config,
                Box::new(LocalClock),
            );

            dispatch.run(shutdown).await;
        }
    }

    Ok(())
}
