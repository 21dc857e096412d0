use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::types::{Bar, OrderAck, OrderSide};

/// Source of historical/current bars for the symbol universe. May return an
/// empty map, which the engine treats as "skip this iteration", not fatal.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch(
        &self,
        symbols: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashMap<String, Vec<Bar>>>;
}

/// Order execution capability. Fire-and-forget from the engine's point of
/// view: a failed placement is logged per signal and never aborts the batch.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    /// Establish the broker session. Failure here is fatal to the run.
    async fn connect(&mut self) -> Result<()>;

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderAck>;

    fn is_paper(&self) -> bool;

    fn name(&self) -> &'static str;
}

/// Injected shutdown confirmation: decides whether remaining open positions
/// are force-closed at the current mark. Keeps the engine testable without
/// simulating terminal input.
pub trait ConfirmExit: Send + Sync {
    fn confirm_close_all(&self, open_positions: usize) -> bool;
}
