pub mod engine;
pub mod ledger;
pub mod monitor;
pub mod sizing;
