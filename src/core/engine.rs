// src/core/engine.rs
//! The trading cycle controller. Owns the ledger and the collaborator set,
//! drives the periodic evaluate/execute loop, and handles startup, retrain
//! cadence, persistence, and graceful shutdown.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::connectors::traits::{ConfirmExit, ExecutionClient, MarketDataProvider};
use crate::core::ledger::Ledger;
use crate::core::monitor::Monitor;
use crate::core::sizing::position_size;
use crate::error::{EngineError, LedgerError};
use crate::model::traits::{FeatureBuilder, ProbabilityModel, RegimeClassifier, WeightOptimizer};
use crate::strategies::momentum::{evaluate_exit, EntryDecision, EntryRules, ExitDecision};
use crate::types::{CloseReason, IndicatorRow, Position, Side, Signal};

/// Engine lifecycle. Transitions are logged; the cycle states (`Evaluating`,
/// `Executing`, `Retraining`) bracket work inside a single tick and always
/// return to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Disconnected,
    Connected,
    Training,
    Idle,
    Evaluating,
    Executing,
    Retraining,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Disconnected => "disconnected",
            EngineState::Connected => "connected",
            EngineState::Training => "training",
            EngineState::Idle => "idle",
            EngineState::Evaluating => "evaluating",
            EngineState::Executing => "executing",
            EngineState::Retraining => "retraining",
            EngineState::ShuttingDown => "shutting-down",
            EngineState::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

pub struct TradingEngine {
    config: AppConfig,
    ledger: Ledger,
    monitor: Monitor,
    state: EngineState,
    entry_rules: EntryRules,
    weights: HashMap<String, f64>,
    last_retrain: DateTime<Utc>,

    broker: Box<dyn ExecutionClient>,
    data: Box<dyn MarketDataProvider>,
    features: Box<dyn FeatureBuilder>,
    model: Box<dyn ProbabilityModel>,
    regime: Box<dyn RegimeClassifier>,
    optimizer: Box<dyn WeightOptimizer>,
    confirm: Box<dyn ConfirmExit>,
}

/// Stop and target prices from the entry price and an ATR value.
fn brackets(
    side: Side,
    price: Decimal,
    atr: Decimal,
    stop_multiple: f64,
    target_multiple: f64,
) -> (Decimal, Decimal) {
    let stop_distance = atr * Decimal::from_f64(stop_multiple).unwrap_or_default();
    let target_distance = atr * Decimal::from_f64(target_multiple).unwrap_or_default();
    match side {
        Side::Long => (price - stop_distance, price + target_distance),
        Side::Short => (price + stop_distance, price - target_distance),
    }
}

/// Next-period direction labels for training: `true` when the following
/// row's close is higher. One label per row except the last.
fn direction_labels(rows: &[IndicatorRow]) -> Vec<bool> {
    rows.windows(2).map(|w| w[1].close > w[0].close).collect()
}

impl TradingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        broker: Box<dyn ExecutionClient>,
        data: Box<dyn MarketDataProvider>,
        features: Box<dyn FeatureBuilder>,
        model: Box<dyn ProbabilityModel>,
        regime: Box<dyn RegimeClassifier>,
        optimizer: Box<dyn WeightOptimizer>,
        confirm: Box<dyn ConfirmExit>,
    ) -> Self {
        let entry_rules = EntryRules {
            prob_threshold: config.strategy.prob_threshold,
            trade_in_choppy: config.strategy.trade_in_choppy,
        };
        let ledger = Ledger::new(config.start_capital_dec());
        let monitor = Monitor::new(config.alerts.clone());
        Self {
            config,
            ledger,
            monitor,
            state: EngineState::Disconnected,
            entry_rules,
            weights: HashMap::new(),
            last_retrain: Utc::now(),
            broker,
            data,
            features,
            model,
            regime,
            optimizer,
            confirm,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn transition(&mut self, next: EngineState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "engine state");
            self.state = next;
        }
    }

    /// Connect the broker, restore persisted ledger state, fit the model, and
    /// compute asset weights. Broker or training failure is fatal.
    pub async fn startup(&mut self) -> Result<(), EngineError> {
        info!(
            broker = self.broker.name(),
            paper = self.broker.is_paper(),
            symbols = self.config.symbols.len(),
            "starting up"
        );

        self.broker
            .connect()
            .await
            .map_err(|e| EngineError::BrokerConnect(e.to_string()))?;
        self.transition(EngineState::Connected);

        self.restore_state().await;

        self.transition(EngineState::Training);
        let samples = self
            .train_model()
            .await
            .map_err(|e| EngineError::Training(e.to_string()))?;
        self.last_retrain = Utc::now();
        info!(samples, "model trained");

        self.compute_weights().await;
        self.transition(EngineState::Idle);
        Ok(())
    }

    /// Run until interrupted: evaluate on every tick, then shut down
    /// gracefully on ctrl-c or SIGTERM.
    pub async fn run(&mut self) -> Result<()> {
        self.startup().await?;

        let mut ticker = tokio::time::interval(self.config.update_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle(Utc::now()).await {
                        warn!(error = %e, "cycle failed; continuing");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("termination signal received");
                    break;
                }
            }
        }

        self.shutdown().await
    }

    /// One full iteration: fetch, mark, evaluate, execute, persist, monitor,
    /// retrain check. Data starvation skips the iteration without error.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(EngineState::Evaluating);

        let start = now - chrono::Duration::days(self.config.history_days);
        let bars = match self.data.fetch(&self.config.symbols, start, now).await {
            Ok(bars) if !bars.is_empty() => bars,
            Ok(_) => {
                warn!("no market data this tick; skipping iteration");
                self.transition(EngineState::Idle);
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "data fetch failed; skipping iteration");
                self.transition(EngineState::Idle);
                return Ok(());
            }
        };

        let mut rows_by_symbol: HashMap<String, Vec<IndicatorRow>> = HashMap::new();
        for (symbol, symbol_bars) in &bars {
            let rows = self.features.build(symbol_bars);
            if rows.len() < self.config.min_history {
                debug!(symbol, rows = rows.len(), "insufficient history; skipped");
                continue;
            }
            rows_by_symbol.insert(symbol.clone(), rows);
        }

        let mut prices: HashMap<String, Decimal> = HashMap::new();
        for (symbol, rows) in &rows_by_symbol {
            if let Some(price) = rows.last().and_then(|r| Decimal::from_f64(r.close)) {
                if price > Decimal::ZERO {
                    prices.insert(symbol.clone(), price);
                }
            }
        }

        let equity = self.ledger.mark_to_market(&prices, now);
        debug!(
            %equity,
            open = self.ledger.open_count(),
            trades_today = self.ledger.trades_today(now),
            "marked to market"
        );

        let signals = self.collect_signals(&rows_by_symbol, &prices);
        if !signals.is_empty() {
            self.transition(EngineState::Executing);
            self.execute_signals(signals, now).await;
        }

        self.save_state().await;
        Monitor::log_alerts(&self.monitor.check_alerts(&self.ledger));
        self.maybe_retrain(now).await;

        self.transition(EngineState::Idle);
        Ok(())
    }

    /// Decide exits and entries for this tick. Exits come first so a freed
    /// slot is usable in the same iteration; entries walk the configured
    /// symbol order and stop adding once the position cap is reached.
    fn collect_signals(
        &self,
        rows_by_symbol: &HashMap<String, Vec<IndicatorRow>>,
        prices: &HashMap<String, Decimal>,
    ) -> Vec<Signal> {
        let mut signals = Vec::new();
        let mut closing: Vec<&str> = Vec::new();

        for symbol in &self.config.symbols {
            let (Some(position), Some(price)) =
                (self.ledger.position(symbol), prices.get(symbol))
            else {
                continue;
            };
            let reason = match evaluate_exit(position, *price) {
                ExitDecision::Hold => continue,
                ExitDecision::Stop => CloseReason::StopLoss,
                ExitDecision::Target => CloseReason::TakeProfit,
            };
            closing.push(symbol);
            signals.push(Signal::Close {
                symbol: symbol.clone(),
                price: *price,
                reason,
            });
        }

        // Slots count against the live book, not against pending closes: a
        // close can still fail at execution, and crediting it early would let
        // an entry push the book over the cap. A freed slot becomes usable on
        // the next tick.
        let mut slots = self
            .config
            .max_positions
            .saturating_sub(self.ledger.open_count());

        for symbol in &self.config.symbols {
            if slots == 0 {
                break;
            }
            if self.ledger.position(symbol).is_some() || closing.contains(&symbol.as_str()) {
                continue;
            }
            let (Some(rows), Some(price)) = (rows_by_symbol.get(symbol), prices.get(symbol))
            else {
                continue;
            };
            let Some(last) = rows.last() else { continue };

            let regime = self.regime.classify(rows);
            let probability = match self.model.predict_probability(last) {
                Ok(p) => p,
                Err(e) => {
                    warn!(symbol, error = %e, "prediction failed; using neutral 0.5");
                    0.5
                }
            };

            let side = match self.entry_rules.evaluate_entry(last, probability, regime) {
                EntryDecision::Flat => continue,
                EntryDecision::Long => Side::Long,
                EntryDecision::Short => Side::Short,
            };

            let Some(atr) = Decimal::from_f64(last.atr).filter(|a| *a > Decimal::ZERO) else {
                continue;
            };

            let mut weight = self
                .weights
                .get(symbol)
                .copied()
                .unwrap_or_else(|| self.config.equal_weight());
            if self.config.strategy.reduce_size_high_vol && regime.is_high_vol() {
                weight *= self.config.strategy.high_vol_size_factor;
            }

            let size = position_size(
                self.ledger.capital(),
                atr,
                *price,
                self.config.vol_target,
                self.config.risk_per_trade,
                weight,
                self.config.strategy.stop_loss_atr,
                self.config.max_position_frac,
            );
            if size <= Decimal::ZERO {
                continue;
            }

            let (stop, target) = brackets(
                side,
                *price,
                atr,
                self.config.strategy.stop_loss_atr,
                self.config.strategy.take_profit_atr,
            );

            slots -= 1;
            signals.push(Signal::Open {
                symbol: symbol.clone(),
                side,
                price: *price,
                size,
                stop,
                target,
                probability,
                regime,
            });
        }

        signals
    }

    /// Execute a signal batch. Order placement happens before the matching
    /// ledger mutation, and a failed signal is logged without aborting the
    /// rest of the batch.
    async fn execute_signals(&mut self, signals: Vec<Signal>, now: DateTime<Utc>) {
        for signal in signals {
            if let Err(e) = self.execute_signal(&signal, now).await {
                warn!(?signal, error = %e, "signal execution failed; skipped");
            }
        }
    }

    async fn execute_signal(&mut self, signal: &Signal, now: DateTime<Utc>) -> Result<()> {
        match signal {
            Signal::Close {
                symbol,
                price,
                reason,
            } => {
                // Resolve the position before going to the broker; a close
                // for a symbol with no open position must not place an order.
                let (side, size) = match self.ledger.position(symbol) {
                    Some(p) => (p.side, p.size),
                    None => return Err(LedgerError::UnknownPosition(symbol.clone()).into()),
                };
                let ack = self
                    .broker
                    .place_order(symbol, side.exit_order(), size)
                    .await?;
                let pnl = self.ledger.close_position(symbol, *price, *reason, now)?;
                info!(
                    symbol,
                    order = %ack.id,
                    %price,
                    %pnl,
                    reason = %reason,
                    "position closed"
                );
            }
            Signal::Open {
                symbol,
                side,
                price,
                size,
                stop,
                target,
                probability,
                regime,
            } => {
                let ack = self
                    .broker
                    .place_order(symbol, side.entry_order(), *size)
                    .await?;
                self.ledger.open_position(Position {
                    symbol: symbol.clone(),
                    side: *side,
                    entry: *price,
                    size: *size,
                    stop: *stop,
                    target: *target,
                    opened_at: now,
                })?;
                info!(
                    symbol,
                    order = %ack.id,
                    %side,
                    %price,
                    %size,
                    %stop,
                    %target,
                    probability,
                    regime = %regime,
                    "position opened"
                );
            }
        }
        Ok(())
    }

    /// Fit the model on the training window across the whole universe.
    async fn train_model(&mut self) -> Result<usize> {
        let end = Utc::now();
        let start = end - chrono::Duration::days(self.config.train_window_days);
        let bars = self.data.fetch(&self.config.symbols, start, end).await?;

        let mut all_rows = Vec::new();
        let mut all_labels = Vec::new();
        for symbol_bars in bars.values() {
            let rows = self.features.build(symbol_bars);
            if rows.len() < 2 {
                continue;
            }
            let labels = direction_labels(&rows);
            all_rows.extend_from_slice(&rows[..labels.len()]);
            all_labels.extend_from_slice(&labels);
        }

        self.model.train(&all_rows, &all_labels)
    }

    /// Retrain once the configured wall-clock interval has elapsed. The clock
    /// resets even when retraining fails, so a persistent failure surfaces
    /// once per interval instead of every tick.
    async fn maybe_retrain(&mut self, now: DateTime<Utc>) {
        if now - self.last_retrain < self.config.retrain_interval() {
            return;
        }
        self.transition(EngineState::Retraining);
        match self.train_model().await {
            Ok(samples) => info!(samples, "model retrained"),
            Err(e) => warn!(error = %e, "retrain failed; keeping previous model"),
        }
        self.last_retrain = now;
        self.compute_weights().await;
    }

    /// Recompute asset weights from recent per-symbol returns. Any failure
    /// leaves the previous weights in place.
    async fn compute_weights(&mut self) {
        let end = Utc::now();
        let start = end - chrono::Duration::days(self.config.history_days);
        let bars = match self.data.fetch(&self.config.symbols, start, end).await {
            Ok(bars) => bars,
            Err(e) => {
                warn!(error = %e, "weight data fetch failed; keeping previous weights");
                return;
            }
        };

        let mut returns: HashMap<String, Vec<f64>> = HashMap::new();
        for (symbol, symbol_bars) in &bars {
            let rows = self.features.build(symbol_bars);
            let series: Vec<f64> = rows
                .iter()
                .rev()
                .take(self.config.lookback_correlation)
                .map(|r| r.ret_1)
                .collect();
            if !series.is_empty() {
                returns.insert(symbol.clone(), series);
            }
        }

        if returns.is_empty() {
            return;
        }
        self.weights = self.optimizer.weights(&returns);
        debug!(assets = self.weights.len(), "weights updated");
    }

    /// Close the loop: optionally flatten the book, persist, and report.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.transition(EngineState::ShuttingDown);

        let open = self.ledger.open_symbols();
        if !open.is_empty() && self.confirm.confirm_close_all(open.len()) {
            for symbol in open {
                let Some(position) = self.ledger.position(&symbol) else {
                    continue;
                };
                let mark = self.ledger.last_mark(&symbol).unwrap_or(position.entry);
                let exit_order = position.side.exit_order();
                let size = position.size;
                if let Err(e) = self.broker.place_order(&symbol, exit_order, size).await {
                    warn!(symbol, error = %e, "flatten order rejected; closing on ledger only");
                }
                match self
                    .ledger
                    .close_position(&symbol, mark, CloseReason::ManualClose, Utc::now())
                {
                    Ok(pnl) => info!(symbol, %mark, %pnl, "position flattened"),
                    Err(e) => error!(symbol, error = %e, "flatten failed"),
                }
            }
        }

        self.save_state().await;

        let metrics = self.ledger.metrics();
        info!(
            capital = %metrics.capital,
            realized_pnl = %metrics.realized_pnl,
            total_return = format!("{:.2}%", metrics.total_return * 100.0),
            max_drawdown = format!("{:.2}%", metrics.max_drawdown * 100.0),
            win_rate = format!("{:.0}%", metrics.win_rate * 100.0),
            trades = metrics.total_trades,
            open = metrics.open_positions,
            "final portfolio"
        );

        self.transition(EngineState::Stopped);
        Ok(())
    }

    /// Persist the ledger as JSON. Persistence failure is never fatal to the
    /// trading loop.
    async fn save_state(&self) {
        let json = match serde_json::to_string_pretty(&self.ledger) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "ledger serialization failed; state not saved");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&self.config.state_file, json).await {
            warn!(file = %self.config.state_file, error = %e, "state save failed");
        }
    }

    /// Restore a previously saved ledger, if any. A missing or unreadable
    /// state file starts a fresh ledger.
    async fn restore_state(&mut self) {
        let raw = match tokio::fs::read_to_string(&self.config.state_file).await {
            Ok(raw) => raw,
            Err(_) => return,
        };
        match serde_json::from_str::<Ledger>(&raw) {
            Ok(ledger) => {
                info!(
                    file = %self.config.state_file,
                    capital = %ledger.capital(),
                    open = ledger.open_count(),
                    "restored persisted state"
                );
                self.ledger = ledger;
            }
            Err(e) => warn!(
                file = %self.config.state_file,
                error = %e,
                "state file unreadable; starting fresh"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bar, OrderAck, OrderSide, Regime};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingBroker {
        placed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ExecutionClient for CountingBroker {
        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        async fn place_order(
            &self,
            symbol: &str,
            _side: OrderSide,
            _quantity: Decimal,
        ) -> Result<OrderAck> {
            self.placed.fetch_add(1, Ordering::SeqCst);
            Ok(OrderAck {
                id: "count".to_string(),
                symbol: symbol.to_string(),
                status: "filled".to_string(),
            })
        }

        fn is_paper(&self) -> bool {
            true
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    struct NoData;

    #[async_trait]
    impl MarketDataProvider for NoData {
        async fn fetch(
            &self,
            _symbols: &[String],
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<HashMap<String, Vec<Bar>>> {
            Ok(HashMap::new())
        }
    }

    struct NoFeatures;

    impl FeatureBuilder for NoFeatures {
        fn build(&self, _bars: &[Bar]) -> Vec<IndicatorRow> {
            Vec::new()
        }
    }

    struct NeutralModel;

    impl ProbabilityModel for NeutralModel {
        fn train(&mut self, rows: &[IndicatorRow], _labels: &[bool]) -> Result<usize> {
            Ok(rows.len())
        }

        fn predict_probability(&self, _row: &IndicatorRow) -> Result<f64> {
            Ok(0.5)
        }
    }

    struct QuietRegime;

    impl RegimeClassifier for QuietRegime {
        fn classify(&self, _window: &[IndicatorRow]) -> Regime {
            Regime::ChoppyLowVol
        }
    }

    struct NoWeights;

    impl WeightOptimizer for NoWeights {
        fn weights(&self, _returns: &HashMap<String, Vec<f64>>) -> HashMap<String, f64> {
            HashMap::new()
        }
    }

    struct NoConfirm;

    impl ConfirmExit for NoConfirm {
        fn confirm_close_all(&self, _open_positions: usize) -> bool {
            false
        }
    }

    fn stub_engine(placed: Arc<AtomicUsize>) -> TradingEngine {
        TradingEngine::new(
            crate::config::AppConfig::default(),
            Box::new(CountingBroker { placed }),
            Box::new(NoData),
            Box::new(NoFeatures),
            Box::new(NeutralModel),
            Box::new(QuietRegime),
            Box::new(NoWeights),
            Box::new(NoConfirm),
        )
    }

    #[tokio::test]
    async fn closing_an_unknown_position_places_no_order() {
        let placed = Arc::new(AtomicUsize::new(0));
        let mut engine = stub_engine(placed.clone());

        let signal = Signal::Close {
            symbol: "AAPL".to_string(),
            price: dec!(100),
            reason: CloseReason::StopLoss,
        };
        let err = engine.execute_signal(&signal, Utc::now()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::UnknownPosition(_))
        ));
        assert_eq!(placed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn long_brackets_straddle_entry() {
        let (stop, target) = brackets(Side::Long, dec!(100), dec!(2), 2.0, 4.0);
        assert_eq!(stop, dec!(96));
        assert_eq!(target, dec!(108));
    }

    #[test]
    fn short_brackets_invert() {
        let (stop, target) = brackets(Side::Short, dec!(100), dec!(2), 2.0, 4.0);
        assert_eq!(stop, dec!(104));
        assert_eq!(target, dec!(92));
    }

    #[test]
    fn labels_follow_next_close() {
        let mut rows = Vec::new();
        for close in [100.0, 101.0, 99.0, 102.0] {
            rows.push(IndicatorRow {
                close,
                atr: 1.0,
                ema_fast: close,
                ema_slow: close,
                macd_hist: 0.0,
                price_ema_ratio: 0.0,
                atr_norm: 0.01,
                ret_1: 0.0,
                ret_5: 0.0,
                ret_20: 0.0,
            });
        }
        assert_eq!(direction_labels(&rows), vec![true, false, true]);
    }
}
