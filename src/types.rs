// src/types.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Order side that opens a position in this direction.
    pub fn entry_order(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that flattens a position in this direction.
    pub fn exit_order(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Side of an order sent to the execution client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Categorical label summarizing recent market behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    ChoppyHighVol,
    ChoppyLowVol,
}

impl Regime {
    pub fn is_choppy(&self) -> bool {
        matches!(self, Regime::ChoppyHighVol | Regime::ChoppyLowVol)
    }

    pub fn is_high_vol(&self) -> bool {
        matches!(self, Regime::ChoppyHighVol)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Regime::TrendingUp => "trending-up",
            Regime::TrendingDown => "trending-down",
            Regime::ChoppyHighVol => "choppy-high-vol",
            Regime::ChoppyLowVol => "choppy-low-vol",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    ManualClose,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::StopLoss => write!(f, "stop_loss"),
            CloseReason::TakeProfit => write!(f, "take_profit"),
            CloseReason::ManualClose => write!(f, "manual_close"),
        }
    }
}

/// An open trade tracked by the ledger.
///
/// Bracket invariants: for a long, `stop < entry < target`; for a short,
/// `target < entry < stop`. The engine constructs brackets from the entry
/// price and the ATR multiples, so the invariant holds by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub entry: Decimal,
    pub size: Decimal,
    pub stop: Decimal,
    pub target: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        match self.side {
            Side::Long => (price - self.entry) * self.size,
            Side::Short => (self.entry - price) * self.size,
        }
    }

    pub fn notional(&self, price: Decimal) -> Decimal {
        price * self.size
    }
}

/// A closed trade, kept append-only in the ledger history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: String,
    pub side: Side,
    pub entry: Decimal,
    pub exit: Decimal,
    pub size: Decimal,
    pub pnl: Decimal,
    pub reason: CloseReason,
    pub closed_at: DateTime<Utc>,
}

/// One mark-to-market sample of portfolio equity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EquityPoint {
    pub at: DateTime<Utc>,
    pub equity: Decimal,
}

/// Ephemeral per-iteration decision record. Created and consumed by the
/// engine within a single cycle; never persisted.
#[derive(Debug, Clone)]
pub enum Signal {
    Open {
        symbol: String,
        side: Side,
        price: Decimal,
        size: Decimal,
        stop: Decimal,
        target: Decimal,
        probability: f64,
        regime: Regime,
    },
    Close {
        symbol: String,
        price: Decimal,
        reason: CloseReason,
    },
}

/// A single OHLCV bar from the data provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bar {
    pub at: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Latest per-symbol indicator snapshot produced by the feature builder.
/// `atr` is the volatility proxy used for sizing and stop placement.
#[derive(Debug, Clone, Copy)]
pub struct IndicatorRow {
    pub close: f64,
    pub atr: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub macd_hist: f64,
    /// close / ema_slow - 1
    pub price_ema_ratio: f64,
    /// atr / close
    pub atr_norm: f64,
    pub ret_1: f64,
    pub ret_5: f64,
    pub ret_20: f64,
}

/// Acknowledgement returned by the execution client for a placed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub id: String,
    pub symbol: String,
    pub status: String,
}
