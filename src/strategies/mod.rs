pub mod momentum;

pub use momentum::{evaluate_exit, EntryDecision, EntryRules, ExitDecision};
