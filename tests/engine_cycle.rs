// tests/engine_cycle.rs
//! End-to-end cycle behavior with mocked collaborators: entry capping,
//! bracket exits, per-signal failure tolerance, and data starvation.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use helmsman::config::AppConfig;
use helmsman::connectors::traits::{ConfirmExit, ExecutionClient, MarketDataProvider};
use helmsman::core::engine::TradingEngine;
use helmsman::model::traits::{FeatureBuilder, ProbabilityModel, RegimeClassifier, WeightOptimizer};
use helmsman::types::{Bar, CloseReason, IndicatorRow, OrderAck, OrderSide, Regime};

fn ts(cycle: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + cycle * 60, 0).unwrap()
}

/// Serves a fixed per-symbol price schedule, one entry per fetch call.
/// The last scheduled price repeats once the schedule is exhausted; an
/// empty schedule yields an empty response.
struct ScheduledData {
    schedule: HashMap<String, Vec<f64>>,
    calls: AtomicUsize,
}

impl ScheduledData {
    fn new(schedule: &[(&str, &[f64])]) -> Self {
        Self {
            schedule: schedule
                .iter()
                .map(|(s, p)| (s.to_string(), p.to_vec()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MarketDataProvider for ScheduledData {
    async fn fetch(
        &self,
        symbols: &[String],
        _start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashMap<String, Vec<Bar>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut out = HashMap::new();
        for symbol in symbols {
            let Some(prices) = self.schedule.get(symbol) else {
                continue;
            };
            if prices.is_empty() {
                continue;
            }
            let close = prices[call.min(prices.len() - 1)];
            // A short run of identical bars; the feature stub only reads closes.
            let bars: Vec<Bar> = (0..5)
                .map(|i| Bar {
                    at: end - Duration::days(4 - i),
                    open: close,
                    high: close * 1.01,
                    low: close * 0.99,
                    close,
                    volume: 1000.0,
                })
                .collect();
            out.insert(symbol.clone(), bars);
        }
        Ok(out)
    }
}

/// Emits an unambiguously bullish row per bar so entries depend only on the
/// model probability and the regime gate.
struct BullishFeatures;

impl FeatureBuilder for BullishFeatures {
    fn build(&self, bars: &[Bar]) -> Vec<IndicatorRow> {
        bars.iter()
            .map(|bar| IndicatorRow {
                close: bar.close,
                atr: 2.0,
                ema_fast: bar.close * 0.95,
                ema_slow: bar.close * 0.90,
                macd_hist: 1.0,
                price_ema_ratio: 0.1,
                atr_norm: 2.0 / bar.close,
                ret_1: 0.01,
                ret_5: 0.03,
                ret_20: 0.08,
            })
            .collect()
    }
}

/// Fixed-probability model; optionally fails every prediction.
struct FixedModel {
    probability: f64,
    fail: bool,
}

impl ProbabilityModel for FixedModel {
    fn train(&mut self, rows: &[IndicatorRow], _labels: &[bool]) -> Result<usize> {
        Ok(rows.len())
    }

    fn predict_probability(&self, _row: &IndicatorRow) -> Result<f64> {
        if self.fail {
            bail!("model unavailable");
        }
        Ok(self.probability)
    }
}

struct FixedRegime(Regime);

impl RegimeClassifier for FixedRegime {
    fn classify(&self, _window: &[IndicatorRow]) -> Regime {
        self.0
    }
}

struct EqualWeights;

impl WeightOptimizer for EqualWeights {
    fn weights(&self, returns: &HashMap<String, Vec<f64>>) -> HashMap<String, f64> {
        let n = returns.len().max(1) as f64;
        returns.keys().map(|s| (s.clone(), 1.0 / n)).collect()
    }
}

#[derive(Clone)]
struct RecordingBroker {
    orders: Arc<Mutex<Vec<(String, OrderSide, Decimal)>>>,
    fail_symbols: HashSet<String>,
    fail_sells: bool,
}

impl RecordingBroker {
    fn new() -> Self {
        Self {
            orders: Arc::new(Mutex::new(Vec::new())),
            fail_symbols: HashSet::new(),
            fail_sells: false,
        }
    }

    fn failing_on(symbols: &[&str]) -> Self {
        let mut broker = Self::new();
        broker.fail_symbols = symbols.iter().map(|s| s.to_string()).collect();
        broker
    }

    fn rejecting_sells() -> Self {
        let mut broker = Self::new();
        broker.fail_sells = true;
        broker
    }
}

#[async_trait]
impl ExecutionClient for RecordingBroker {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderAck> {
        if self.fail_symbols.contains(symbol) {
            bail!("order rejected for {symbol}");
        }
        if self.fail_sells && side == OrderSide::Sell {
            bail!("sell order rejected for {symbol}");
        }
        self.orders
            .lock()
            .unwrap()
            .push((symbol.to_string(), side, quantity));
        Ok(OrderAck {
            id: format!("mock-{symbol}"),
            symbol: symbol.to_string(),
            status: "filled".to_string(),
        })
    }

    fn is_paper(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

struct NeverConfirm;

impl ConfirmExit for NeverConfirm {
    fn confirm_close_all(&self, _open_positions: usize) -> bool {
        false
    }
}

fn test_config(symbols: &[&str], max_positions: usize) -> AppConfig {
    let mut config = AppConfig::default();
    config.symbols = symbols.iter().map(|s| s.to_string()).collect();
    config.max_positions = max_positions;
    config.min_history = 1;
    config.state_file = std::env::temp_dir()
        .join(format!("helmsman-test-{}.json", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .into_owned();
    config
}

fn engine_in_regime(
    config: AppConfig,
    broker: RecordingBroker,
    data: ScheduledData,
    model: FixedModel,
    regime: Regime,
) -> TradingEngine {
    TradingEngine::new(
        config,
        Box::new(broker),
        Box::new(data),
        Box::new(BullishFeatures),
        Box::new(model),
        Box::new(FixedRegime(regime)),
        Box::new(EqualWeights),
        Box::new(NeverConfirm),
    )
}

fn engine_with(
    config: AppConfig,
    broker: RecordingBroker,
    data: ScheduledData,
    model: FixedModel,
) -> TradingEngine {
    engine_in_regime(config, broker, data, model, Regime::TrendingUp)
}

#[tokio::test]
async fn position_cap_admits_first_symbols_in_config_order() {
    let config = test_config(&["AAA", "BBB", "CCC"], 2);
    let broker = RecordingBroker::new();
    let orders = broker.orders.clone();
    let data = ScheduledData::new(&[
        ("AAA", &[100.0]),
        ("BBB", &[100.0]),
        ("CCC", &[100.0]),
    ]);
    let mut engine = engine_with(config, broker, data, FixedModel {
        probability: 0.9,
        fail: false,
    });

    engine.run_cycle(ts(1)).await.unwrap();

    assert_eq!(engine.ledger().open_count(), 2);
    assert!(engine.ledger().position("AAA").is_some());
    assert!(engine.ledger().position("BBB").is_some());
    assert!(engine.ledger().position("CCC").is_none());

    let placed = orders.lock().unwrap();
    assert_eq!(placed.len(), 2);
    assert_eq!(placed[0].0, "AAA");
    assert_eq!(placed[0].1, OrderSide::Buy);
    assert_eq!(placed[1].0, "BBB");
}

#[tokio::test]
async fn stop_is_hit_on_the_way_down() {
    // Entry at 100 with atr 2 and a 2x stop puts the stop at 96: 99 holds,
    // 95 closes at a loss.
    let config = test_config(&["AAA"], 5);
    let broker = RecordingBroker::new();
    let orders = broker.orders.clone();
    let data = ScheduledData::new(&[("AAA", &[100.0, 99.0, 95.0])]);
    let mut engine = engine_with(config, broker, data, FixedModel {
        probability: 0.9,
        fail: false,
    });

    engine.run_cycle(ts(1)).await.unwrap();
    let size = engine.ledger().position("AAA").unwrap().size;
    assert!(size > Decimal::ZERO);

    engine.run_cycle(ts(2)).await.unwrap();
    assert!(engine.ledger().position("AAA").is_some(), "99 is inside the bracket");

    engine.run_cycle(ts(3)).await.unwrap();
    assert!(engine.ledger().position("AAA").is_none());

    let trades = engine.ledger().trade_history();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].reason, CloseReason::StopLoss);
    assert_eq!(trades[0].pnl, (dec!(95) - dec!(100)) * size);
    assert!(trades[0].pnl < Decimal::ZERO);
    assert_eq!(engine.ledger().capital(), dec!(100000) + trades[0].pnl);

    // Exit then entry re-evaluation: the sell closing the position is the
    // last order placed (the freed slot re-enters only on a later tick).
    let placed = orders.lock().unwrap();
    assert_eq!(placed.last().unwrap().1, OrderSide::Sell);
}

#[tokio::test]
async fn target_exit_realizes_a_gain() {
    // Entry at 100, target at 100 + 4*2 = 108.
    let config = test_config(&["AAA"], 5);
    let broker = RecordingBroker::new();
    let data = ScheduledData::new(&[("AAA", &[100.0, 109.0])]);
    let mut engine = engine_with(config, broker, data, FixedModel {
        probability: 0.9,
        fail: false,
    });

    engine.run_cycle(ts(1)).await.unwrap();
    let size = engine.ledger().position("AAA").unwrap().size;

    engine.run_cycle(ts(2)).await.unwrap();
    let trades = engine.ledger().trade_history();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].reason, CloseReason::TakeProfit);
    assert_eq!(trades[0].pnl, (dec!(109) - dec!(100)) * size);
}

#[tokio::test]
async fn rejected_order_skips_only_that_signal() {
    let config = test_config(&["AAA", "BBB", "CCC"], 10);
    let broker = RecordingBroker::failing_on(&["BBB"]);
    let data = ScheduledData::new(&[
        ("AAA", &[100.0]),
        ("BBB", &[100.0]),
        ("CCC", &[100.0]),
    ]);
    let mut engine = engine_with(config, broker, data, FixedModel {
        probability: 0.9,
        fail: false,
    });

    engine.run_cycle(ts(1)).await.unwrap();

    assert_eq!(engine.ledger().open_count(), 2);
    assert!(engine.ledger().position("AAA").is_some());
    assert!(engine.ledger().position("BBB").is_none());
    assert!(engine.ledger().position("CCC").is_some());
}

#[tokio::test]
async fn empty_fetch_skips_the_iteration() {
    let config = test_config(&["AAA"], 5);
    let broker = RecordingBroker::new();
    let data = ScheduledData::new(&[]);
    let mut engine = engine_with(config, broker, data, FixedModel {
        probability: 0.9,
        fail: false,
    });

    engine.run_cycle(ts(1)).await.unwrap();

    assert_eq!(engine.ledger().open_count(), 0);
    assert!(engine.ledger().equity_curve().is_empty());
}

#[tokio::test]
async fn failed_prediction_defaults_to_neutral_and_blocks_entries() {
    let config = test_config(&["AAA", "BBB"], 5);
    let broker = RecordingBroker::new();
    let orders = broker.orders.clone();
    let data = ScheduledData::new(&[("AAA", &[100.0]), ("BBB", &[100.0])]);
    let mut engine = engine_with(config, broker, data, FixedModel {
        probability: 0.9,
        fail: true,
    });

    engine.run_cycle(ts(1)).await.unwrap();

    // Neutral 0.5 never clears the 0.6 threshold.
    assert_eq!(engine.ledger().open_count(), 0);
    assert!(orders.lock().unwrap().is_empty());
    // The cycle itself still completes and marks equity.
    assert_eq!(engine.ledger().equity_curve().len(), 1);
}

#[tokio::test]
async fn cap_holds_when_a_close_order_is_rejected() {
    // AAA gaps through its stop while BBB is eligible, but the closing sell
    // is rejected: the slot was never actually freed, so BBB must not open
    // and the book stays at the cap.
    let config = test_config(&["AAA", "BBB"], 1);
    let broker = RecordingBroker::rejecting_sells();
    let data = ScheduledData::new(&[("AAA", &[100.0, 90.0]), ("BBB", &[100.0, 100.0])]);
    let mut engine = engine_with(config, broker, data, FixedModel {
        probability: 0.9,
        fail: false,
    });

    engine.run_cycle(ts(1)).await.unwrap();
    assert!(engine.ledger().position("AAA").is_some());
    assert_eq!(engine.ledger().open_count(), 1);

    engine.run_cycle(ts(2)).await.unwrap();
    assert_eq!(engine.ledger().open_count(), 1);
    assert!(engine.ledger().position("AAA").is_some(), "failed close keeps AAA open");
    assert!(engine.ledger().position("BBB").is_none(), "no slot was freed for BBB");
    assert!(engine.ledger().trade_history().is_empty());
}

#[tokio::test]
async fn high_vol_regime_scales_entry_size_down() {
    // weight 1.0, risk 1%, atr 2, 2x stop => 250 units unreduced; the
    // high-vol factor of 0.5 halves it. Notional cap lifted so it can't bind.
    let mut config = test_config(&["AAA"], 5);
    config.max_position_frac = 1.0;
    config.strategy.trade_in_choppy = true;

    let broker = RecordingBroker::new();
    let data = ScheduledData::new(&[("AAA", &[100.0])]);
    let mut engine = engine_in_regime(
        config,
        broker,
        data,
        FixedModel {
            probability: 0.9,
            fail: false,
        },
        Regime::ChoppyHighVol,
    );
    engine.run_cycle(ts(1)).await.unwrap();
    assert_eq!(engine.ledger().position("AAA").unwrap().size, dec!(125));

    // With the reduction disabled the same setup sizes at the full budget.
    let mut config = test_config(&["AAA"], 5);
    config.max_position_frac = 1.0;
    config.strategy.trade_in_choppy = true;
    config.strategy.reduce_size_high_vol = false;

    let broker = RecordingBroker::new();
    let data = ScheduledData::new(&[("AAA", &[100.0])]);
    let mut engine = engine_in_regime(
        config,
        broker,
        data,
        FixedModel {
            probability: 0.9,
            fail: false,
        },
        Regime::ChoppyHighVol,
    );
    engine.run_cycle(ts(1)).await.unwrap();
    assert_eq!(engine.ledger().position("AAA").unwrap().size, dec!(250));
}

#[tokio::test]
async fn shutdown_without_confirmation_keeps_positions() {
    let config = test_config(&["AAA"], 5);
    let broker = RecordingBroker::new();
    let data = ScheduledData::new(&[("AAA", &[100.0])]);
    let mut engine = engine_with(config, broker, data, FixedModel {
        probability: 0.9,
        fail: false,
    });

    engine.run_cycle(ts(1)).await.unwrap();
    assert_eq!(engine.ledger().open_count(), 1);

    engine.shutdown().await.unwrap();
    assert_eq!(engine.ledger().open_count(), 1);
}
