// src/connectors/synthetic.rs
//! Deterministic bar generator used by the default binary and by tests.
//! Real market data acquisition is a collaborator concern behind
//! `MarketDataProvider`; this feed exists so the loop can run end to end
//! without credentials.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::connectors::traits::MarketDataProvider;
use crate::types::Bar;

/// Daily bars from a seeded random walk with a mild upward drift. The same
/// (symbol, start, end) request always yields the same bars.
pub struct SyntheticFeed {
    base_price: f64,
    drift: f64,
}

impl SyntheticFeed {
    pub fn new() -> Self {
        Self {
            base_price: 100.0,
            drift: 0.0004,
        }
    }

    fn seed_for(symbol: &str) -> u64 {
        // FNV-1a over the symbol bytes; stable across runs.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in symbol.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash
    }

    fn bars_for(&self, symbol: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Bar> {
        let days = (end - start).num_days().max(0);
        let mut state = Self::seed_for(symbol);
        let mut next = move || {
            // xorshift64
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state as f64 / u64::MAX as f64) - 0.5
        };

        let mut close = self.base_price * (1.0 + (Self::seed_for(symbol) % 100) as f64 / 100.0);
        let mut bars = Vec::with_capacity(days as usize);
        for day in 0..days {
            let ret = self.drift + 0.015 * next();
            let open = close;
            close = (close * (1.0 + ret)).max(0.01);
            let span = close.abs() * 0.01 * (1.0 + next().abs());
            let high = open.max(close) + span;
            let low = (open.min(close) - span).max(0.01);
            bars.push(Bar {
                at: start + Duration::days(day),
                open,
                high,
                low,
                close,
                volume: 1_000_000.0 * (1.0 + next().abs()),
            });
        }
        bars
    }
}

impl Default for SyntheticFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for SyntheticFeed {
    async fn fetch(
        &self,
        symbols: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashMap<String, Vec<Bar>>> {
        let mut out = HashMap::new();
        for symbol in symbols {
            out.insert(symbol.clone(), self.bars_for(symbol, start, end));
        }
        Ok(out)
    }
}
