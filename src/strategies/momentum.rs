// src/strategies/momentum.rs
//! Regime-gated momentum signal evaluation. Entry and exit rules are pure
//! functions of their inputs; the engine owns all side effects.

use rust_decimal::Decimal;

use crate::types::{IndicatorRow, Position, Regime, Side};

/// Entry decision for the latest indicator row of one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryDecision {
    Flat,
    Long,
    Short,
}

/// Exit decision for an open position at the current price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    Hold,
    Stop,
    Target,
}

/// Entry rule configuration.
///
/// Probability convention: `probability` is the model's confidence that the
/// price rises. Longs require `probability >= prob_threshold`; shorts use the
/// complement, `1 - probability >= prob_threshold`. With a threshold above
/// 0.5 the two conditions are mutually exclusive; the long branch is checked
/// first, so a row that somehow qualifies for both resolves to Long.
#[derive(Debug, Clone, Copy)]
pub struct EntryRules {
    pub prob_threshold: f64,
    pub trade_in_choppy: bool,
}

impl EntryRules {
    pub fn evaluate_entry(
        &self,
        row: &IndicatorRow,
        probability: f64,
        regime: Regime,
    ) -> EntryDecision {
        if regime.is_choppy() && !self.trade_in_choppy {
            return EntryDecision::Flat;
        }

        // Trend filter (price vs slow EMA, fast above slow) plus momentum
        // confirmation (MACD histogram sign), then the model gate.
        let upward_bias =
            row.close > row.ema_slow && row.ema_fast > row.ema_slow && row.macd_hist > 0.0;
        if upward_bias && probability >= self.prob_threshold {
            return EntryDecision::Long;
        }

        let downward_bias =
            row.close < row.ema_slow && row.ema_fast < row.ema_slow && row.macd_hist < 0.0;
        if downward_bias && (1.0 - probability) >= self.prob_threshold {
            return EntryDecision::Short;
        }

        EntryDecision::Flat
    }
}

/// Check an open position's bracket against the current price.
///
/// When a price gap makes both legs true in the same evaluation, the stop
/// wins — risk containment takes priority over profit taking.
pub fn evaluate_exit(position: &Position, current_price: Decimal) -> ExitDecision {
    match position.side {
        Side::Long => {
            if current_price <= position.stop {
                ExitDecision::Stop
            } else if current_price >= position.target {
                ExitDecision::Target
            } else {
                ExitDecision::Hold
            }
        }
        Side::Short => {
            if current_price >= position.stop {
                ExitDecision::Stop
            } else if current_price <= position.target {
                ExitDecision::Target
            } else {
                ExitDecision::Hold
            }
        }
    }
}
