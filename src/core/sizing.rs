// src/core/sizing.rs
//! Risk-budgeted position sizing.
//!
//! Quantity is chosen so that hitting the stop realizes approximately the
//! budgeted fraction of capital:
//!
//! ```text
//! dollar_risk   = capital * risk_fraction * asset_weight
//! per_unit_risk = stop_multiple * volatility
//! quantity      = dollar_risk / per_unit_risk
//! ```
//!
//! `stop_multiple` is the same ATR multiple the engine uses for the stop
//! distance, so stop placement and sizing stay consistent. Two caps apply on
//! top: per-position volatility exposure (`quantity * volatility` may not
//! exceed `capital * vol_target`) and per-position notional
//! (`quantity * price` may not exceed `capital * max_position_frac`).

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

/// Compute a trade quantity from the risk budget. Pure and deterministic.
///
/// Returns zero — meaning "no trade", not an error — whenever the inputs
/// cannot produce a positive quantity (zero volatility, zero weight,
/// non-positive capital or price).
#[allow(clippy::too_many_arguments)]
pub fn position_size(
    capital: Decimal,
    volatility: Decimal,
    price: Decimal,
    vol_target: f64,
    risk_fraction: f64,
    asset_weight: f64,
    stop_multiple: f64,
    max_position_frac: f64,
) -> Decimal {
    if capital <= Decimal::ZERO || volatility <= Decimal::ZERO || price <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let risk_fraction = Decimal::from_f64(risk_fraction).unwrap_or_default();
    let asset_weight = Decimal::from_f64(asset_weight).unwrap_or_default();
    let stop_multiple = Decimal::from_f64(stop_multiple).unwrap_or_default();
    let vol_target = Decimal::from_f64(vol_target).unwrap_or_default();
    let max_frac = Decimal::from_f64(max_position_frac).unwrap_or_default();

    let per_unit_risk = stop_multiple * volatility;
    if per_unit_risk <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let dollar_risk = capital * risk_fraction * asset_weight;
    let mut quantity = dollar_risk / per_unit_risk;

    // Volatility-target cap: dollar volatility of the position stays within
    // the portfolio's target share of capital.
    if vol_target > Decimal::ZERO {
        let vol_cap = capital * vol_target / volatility;
        if quantity > vol_cap {
            quantity = vol_cap;
        }
    }

    // Notional cap.
    if max_frac > Decimal::ZERO {
        let notional_cap = capital * max_frac / price;
        if quantity > notional_cap {
            quantity = notional_cap;
        }
    }

    quantity.max(Decimal::ZERO)
}
