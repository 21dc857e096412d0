// src/main.rs
use dotenvy::dotenv;
use std::io::{self, BufRead, Write};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use helmsman::config::AppConfig;
use helmsman::connectors::paper::PaperBroker;
use helmsman::connectors::synthetic::SyntheticFeed;
use helmsman::connectors::traits::ConfirmExit;
use helmsman::core::engine::TradingEngine;
use helmsman::model::baseline::{
    InverseVolatilityWeights, MomentumProbabilityModel, PercentileRegimeClassifier,
};
use helmsman::model::features::TaFeatureBuilder;

const LIVE_CONFIRMATION: &str = "I UNDERSTAND THE RISKS";

/// Prompts on the terminal before open positions are force-closed at
/// shutdown. Declining leaves them in the persisted state file.
struct StdinConfirm;

impl ConfirmExit for StdinConfirm {
    fn confirm_close_all(&self, open_positions: usize) -> bool {
        print!("Close all {open_positions} open position(s) at last mark? [y/N] ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim(), "y" | "Y" | "yes")
    }
}

/// Live trading requires the operator to type the confirmation phrase;
/// anything else drops back to paper mode.
fn confirm_live_trading() -> bool {
    println!("Live trading is enabled in the configuration.");
    println!("Type exactly `{LIVE_CONFIRMATION}` to proceed, anything else for paper mode:");
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    line.trim() == LIVE_CONFIRMATION
}

fn init_logging() -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::daily("logs", "helmsman.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let _log_guard = init_logging();

    let mut config = AppConfig::load()?;

    println!("========================================");
    println!("         HELMSMAN - v{}", env!("CARGO_PKG_VERSION"));
    println!("========================================");
    println!("Universe: {}", config.symbols.join(", "));

    if config.live_trading && !confirm_live_trading() {
        info!("live trading not confirmed; falling back to paper mode");
        config.live_trading = false;
    }
    println!(
        "Mode:     {}",
        if config.live_trading {
            "LIVE TRADING"
        } else {
            "PAPER TRADING"
        }
    );
    println!("========================================");

    // Live execution needs a real broker connector wired in here; until one
    // exists the paper broker handles both modes.
    let broker = Box::new(PaperBroker::new());
    let data = Box::new(SyntheticFeed::new());
    let features = Box::new(TaFeatureBuilder::new(&config.strategy));
    let model = Box::new(MomentumProbabilityModel::new(config.min_train_samples));
    let regime = Box::new(PercentileRegimeClassifier::new(&config.regime));
    let optimizer = Box::new(InverseVolatilityWeights::default());

    let mut engine = TradingEngine::new(
        config,
        broker,
        data,
        features,
        model,
        regime,
        optimizer,
        Box::new(StdinConfirm),
    );

    if let Err(e) = engine.run().await {
        eprintln!("Fatal engine error: {e}");
        std::process::exit(1);
    }

    Ok(())
}
