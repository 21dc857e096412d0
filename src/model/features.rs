// src/model/features.rs
//! Indicator construction on top of the `ta` crate: EMA trend pair, ATR as
//! the volatility proxy, and a MACD histogram assembled from EMAs of price
//! and of the MACD line itself.

use ta::indicators::{AverageTrueRange, ExponentialMovingAverage};
use ta::{DataItem, Next};
use tracing::warn;

use crate::config::StrategyConfig;
use crate::model::traits::FeatureBuilder;
use crate::types::{Bar, IndicatorRow};

pub struct TaFeatureBuilder {
    ema_fast: usize,
    ema_slow: usize,
    atr_period: usize,
    macd_fast: usize,
    macd_slow: usize,
    macd_signal: usize,
}

impl TaFeatureBuilder {
    /// Periods are validated non-zero by `AppConfig::validate`.
    pub fn new(cfg: &StrategyConfig) -> Self {
        Self {
            ema_fast: cfg.ema_fast,
            ema_slow: cfg.ema_slow,
            atr_period: cfg.atr_period,
            macd_fast: cfg.macd_fast,
            macd_slow: cfg.macd_slow,
            macd_signal: cfg.macd_signal,
        }
    }
}

impl FeatureBuilder for TaFeatureBuilder {
    fn build(&self, bars: &[Bar]) -> Vec<IndicatorRow> {
        // Construction only fails on a zero period, which config validation
        // rules out; bail to an empty row set rather than panicking.
        let (
            Ok(mut ema_fast),
            Ok(mut ema_slow),
            Ok(mut atr),
            Ok(mut macd_fast),
            Ok(mut macd_slow),
            Ok(mut macd_signal),
        ) = (
            ExponentialMovingAverage::new(self.ema_fast),
            ExponentialMovingAverage::new(self.ema_slow),
            AverageTrueRange::new(self.atr_period),
            ExponentialMovingAverage::new(self.macd_fast),
            ExponentialMovingAverage::new(self.macd_slow),
            ExponentialMovingAverage::new(self.macd_signal),
        )
        else {
            warn!("invalid indicator periods; producing no rows");
            return Vec::new();
        };

        let mut closes: Vec<f64> = Vec::with_capacity(bars.len());
        let mut rows = Vec::with_capacity(bars.len());

        for bar in bars {
            let item = match DataItem::builder()
                .open(bar.open)
                .high(bar.high)
                .low(bar.low)
                .close(bar.close)
                .volume(bar.volume)
                .build()
            {
                Ok(item) => item,
                Err(_) => {
                    warn!(at = %bar.at, "malformed bar skipped");
                    continue;
                }
            };

            let atr_v = atr.next(&item);
            let ef = ema_fast.next(bar.close);
            let es = ema_slow.next(bar.close);
            let macd_line = macd_fast.next(bar.close) - macd_slow.next(bar.close);
            let macd_hist = macd_line - macd_signal.next(macd_line);

            closes.push(bar.close);
            let ret = |k: usize| -> f64 {
                let n = closes.len();
                if n > k && closes[n - 1 - k] != 0.0 {
                    closes[n - 1] / closes[n - 1 - k] - 1.0
                } else {
                    0.0
                }
            };

            rows.push(IndicatorRow {
                close: bar.close,
                atr: atr_v,
                ema_fast: ef,
                ema_slow: es,
                macd_hist,
                price_ema_ratio: if es != 0.0 { bar.close / es - 1.0 } else { 0.0 },
                atr_norm: if bar.close != 0.0 { atr_v / bar.close } else { 0.0 },
                ret_1: ret(1),
                ret_5: ret(5),
                ret_20: ret(20),
            });
        }

        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use chrono::{Duration, Utc};

    fn bars(closes: &[f64]) -> Vec<Bar> {
        let start = Utc::now() - Duration::days(closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                at: start + Duration::days(i as i64),
                open: close * 0.995,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: 1_000_000.0,
            })
            .collect()
    }

    fn builder() -> TaFeatureBuilder {
        let mut cfg = AppConfig::default().strategy;
        cfg.ema_fast = 5;
        cfg.ema_slow = 20;
        cfg.atr_period = 5;
        TaFeatureBuilder::new(&cfg)
    }

    #[test]
    fn one_row_per_valid_bar() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.5).collect();
        let rows = builder().build(&bars(&closes));
        assert_eq!(rows.len(), 60);
    }

    #[test]
    fn rising_series_has_upward_bias() {
        let closes: Vec<f64> = (0..120).map(|i| 100.0 * 1.01_f64.powi(i)).collect();
        let rows = builder().build(&bars(&closes));
        let last = rows.last().unwrap();
        assert!(last.close > last.ema_slow);
        assert!(last.ema_fast > last.ema_slow);
        assert!(last.macd_hist > 0.0);
        assert!(last.ret_20 > 0.0);
        assert!(last.atr > 0.0);
    }

    #[test]
    fn falling_series_has_downward_bias() {
        let closes: Vec<f64> = (0..120).map(|i| 100.0 * 0.99_f64.powi(i)).collect();
        let rows = builder().build(&bars(&closes));
        let last = rows.last().unwrap();
        assert!(last.close < last.ema_slow);
        assert!(last.ema_fast < last.ema_slow);
        assert!(last.ret_5 < 0.0);
    }

    #[test]
    fn deterministic_for_identical_input() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let input = bars(&closes);
        let a = builder().build(&input);
        let b = builder().build(&input);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.close, y.close);
            assert_eq!(x.atr, y.atr);
            assert_eq!(x.macd_hist, y.macd_hist);
        }
    }
}
