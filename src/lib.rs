// src/lib.rs
//! Periodic multi-asset trading loop: indicator features, a directional
//! probability model, regime-gated momentum entries, risk-budgeted sizing,
//! and a ledger with monitoring and persistence. Market data and execution
//! sit behind traits in `connectors`.

pub mod config;
pub mod connectors;
pub mod core;
pub mod error;
pub mod model;
pub mod strategies;
pub mod types;
