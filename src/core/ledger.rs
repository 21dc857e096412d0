// src/core/ledger.rs
//! Portfolio ledger: capital, open positions, closed-trade history, and the
//! equity curve. Pure state and accounting — no I/O, no clock, no broker.
//!
//! Accounting model: opening a position does not consume capital (margin is
//! the broker's concern); `capital` moves only when a position is closed and
//! its P&L is realized. Equity = capital + unrealized P&L at the last marks.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::error::LedgerError;
use crate::types::{CloseReason, ClosedTrade, EquityPoint, Position};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    start_capital: Decimal,
    capital: Decimal,
    positions: HashMap<String, Position>,
    trade_history: Vec<ClosedTrade>,
    equity_curve: Vec<EquityPoint>,
    /// Last seen mark price per symbol, kept for exposure and forced closes.
    last_marks: HashMap<String, Decimal>,
}

/// Summary statistics derived from ledger state. Read-only snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioMetrics {
    pub capital: Decimal,
    pub realized_pnl: Decimal,
    /// (last equity / starting capital) - 1
    pub total_return: f64,
    /// Largest peak-to-trough decline over the equity curve.
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub avg_pnl: Decimal,
    /// Sum of open notional at the last marks, over capital.
    pub exposure: f64,
    pub total_trades: usize,
    pub open_positions: usize,
}

impl Ledger {
    pub fn new(start_capital: Decimal) -> Self {
        Self {
            start_capital,
            capital: start_capital,
            positions: HashMap::new(),
            trade_history: Vec::new(),
            equity_curve: Vec::new(),
            last_marks: HashMap::new(),
        }
    }

    pub fn capital(&self) -> Decimal {
        self.capital
    }

    pub fn start_capital(&self) -> Decimal {
        self.start_capital
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn open_symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn trade_history(&self) -> &[ClosedTrade] {
        &self.trade_history
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn last_mark(&self, symbol: &str) -> Option<Decimal> {
        self.last_marks.get(symbol).copied()
    }

    /// Insert a new open position. At most one position per symbol.
    pub fn open_position(&mut self, position: Position) -> Result<(), LedgerError> {
        if self.positions.contains_key(&position.symbol) {
            return Err(LedgerError::DuplicateSymbol(position.symbol));
        }
        self.positions.insert(position.symbol.clone(), position);
        Ok(())
    }

    /// Close an open position at `exit_price`, realize its P&L into capital,
    /// and move it to the trade history. Returns the realized P&L.
    pub fn close_position(
        &mut self,
        symbol: &str,
        exit_price: Decimal,
        reason: CloseReason,
        at: DateTime<Utc>,
    ) -> Result<Decimal, LedgerError> {
        let position = self
            .positions
            .remove(symbol)
            .ok_or_else(|| LedgerError::UnknownPosition(symbol.to_string()))?;

        let pnl = position.unrealized_pnl(exit_price);
        self.capital += pnl;
        self.trade_history.push(ClosedTrade {
            symbol: position.symbol,
            side: position.side,
            entry: position.entry,
            exit: exit_price,
            size: position.size,
            pnl,
            reason,
            closed_at: at,
        });
        Ok(pnl)
    }

    /// Revalue every open position at the given prices and append an equity
    /// sample. Does not touch capital. A symbol missing from `prices` is
    /// skipped with a warning (its last known mark, if any, is used instead).
    /// Returns the equity recorded.
    pub fn mark_to_market(
        &mut self,
        prices: &HashMap<String, Decimal>,
        at: DateTime<Utc>,
    ) -> Decimal {
        for (symbol, price) in prices {
            self.last_marks.insert(symbol.clone(), *price);
        }

        let mut equity = self.capital;
        for position in self.positions.values() {
            match self.last_marks.get(&position.symbol) {
                Some(mark) => equity += position.unrealized_pnl(*mark),
                None => warn!(
                    symbol = %position.symbol,
                    "no mark price for open position; excluded from equity this tick"
                ),
            }
        }

        // The curve stays monotone in time; an out-of-order sample is a
        // caller bug, logged and dropped rather than corrupting the curve.
        if let Some(last) = self.equity_curve.last() {
            if at <= last.at {
                warn!(%at, "non-monotonic mark timestamp; equity sample dropped");
                return equity;
            }
        }
        self.equity_curve.push(EquityPoint { at, equity });
        equity
    }

    /// Unrealized P&L of all open positions at the last marks. Positions
    /// without a mark fall back to their entry price (zero unrealized).
    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions
            .values()
            .map(|p| {
                let mark = self.last_marks.get(&p.symbol).copied().unwrap_or(p.entry);
                p.unrealized_pnl(mark)
            })
            .sum()
    }

    /// Closed trades whose close timestamp falls on the same UTC date as `now`.
    pub fn trades_today(&self, now: DateTime<Utc>) -> usize {
        let today = now.date_naive();
        self.trade_history
            .iter()
            .filter(|t| t.closed_at.date_naive() == today)
            .count()
    }

    pub fn metrics(&self) -> PortfolioMetrics {
        let realized_pnl: Decimal = self.trade_history.iter().map(|t| t.pnl).sum();
        let total_trades = self.trade_history.len();
        let wins = self
            .trade_history
            .iter()
            .filter(|t| t.pnl > Decimal::ZERO)
            .count();
        let win_rate = if total_trades > 0 {
            wins as f64 / total_trades as f64
        } else {
            0.0
        };
        let avg_pnl = if total_trades > 0 {
            realized_pnl / Decimal::from(total_trades as u64)
        } else {
            Decimal::ZERO
        };

        let last_equity = self
            .equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(self.capital + self.unrealized_pnl());
        let total_return = if self.start_capital > Decimal::ZERO {
            (last_equity / self.start_capital - Decimal::ONE)
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };

        let open_notional: Decimal = self
            .positions
            .values()
            .map(|p| {
                let mark = self.last_marks.get(&p.symbol).copied().unwrap_or(p.entry);
                p.notional(mark)
            })
            .sum();
        let exposure = if self.capital > Decimal::ZERO {
            (open_notional / self.capital).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        PortfolioMetrics {
            capital: self.capital,
            realized_pnl,
            total_return,
            max_drawdown: max_drawdown(&self.equity_curve),
            win_rate,
            avg_pnl,
            exposure,
            total_trades,
            open_positions: self.positions.len(),
        }
    }

    /// Current decline from the equity curve's running peak, as a fraction.
    pub fn current_drawdown(&self) -> f64 {
        let last = match self.equity_curve.last() {
            Some(p) => p.equity.to_f64().unwrap_or(0.0),
            None => return 0.0,
        };
        let peak = self
            .equity_curve
            .iter()
            .map(|p| p.equity.to_f64().unwrap_or(0.0))
            .fold(f64::MIN, f64::max);
        if peak > 0.0 && last < peak {
            (peak - last) / peak
        } else {
            0.0
        }
    }
}

fn max_drawdown(curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0_f64;
    for point in curve {
        let equity = point.equity.to_f64().unwrap_or(0.0);
        peak = peak.max(equity);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - equity) / peak);
        }
    }
    max_dd
}
