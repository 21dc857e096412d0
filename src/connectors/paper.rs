// src/connectors/paper.rs
//! Simulated execution: every order is acknowledged as filled and logged.
//! The only broker shipped with the crate — real broker wire protocols live
//! behind the same trait in external connectors.

use anyhow::{bail, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::connectors::traits::ExecutionClient;
use crate::types::{OrderAck, OrderSide};

pub struct PaperBroker {
    connected: bool,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self { connected: false }
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionClient for PaperBroker {
    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        info!("paper broker session established");
        Ok(())
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderAck> {
        if !self.connected {
            bail!("paper broker is not connected");
        }
        let ack = OrderAck {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            status: "filled".to_string(),
        };
        info!(order_id = %ack.id, "paper fill: {} {} x{}", side, symbol, quantity);
        Ok(ack)
    }

    fn is_paper(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "paper"
    }
}
