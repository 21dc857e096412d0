// src/core/monitor.rs
//! Threshold monitoring over ledger state. Pure observation: reads the
//! ledger, produces alerts, never mutates and never affects control flow.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{error, warn};

use crate::config::AlertConfig;
use crate::core::ledger::Ledger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Drawdown,
    CapitalFloor,
    Exposure,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub kind: AlertKind,
    pub message: String,
}

pub struct Monitor {
    thresholds: AlertConfig,
}

impl Monitor {
    pub fn new(thresholds: AlertConfig) -> Self {
        Self { thresholds }
    }

    /// Check drawdown, capital floor, and exposure against the configured
    /// thresholds. Critical supersedes warning per dimension.
    pub fn check_alerts(&self, ledger: &Ledger) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let t = &self.thresholds;

        let drawdown = ledger.current_drawdown();
        if drawdown >= t.drawdown_critical {
            alerts.push(Alert {
                severity: AlertSeverity::Critical,
                kind: AlertKind::Drawdown,
                message: format!("drawdown {:.1}% breached critical threshold", drawdown * 100.0),
            });
        } else if drawdown >= t.drawdown {
            alerts.push(Alert {
                severity: AlertSeverity::Warning,
                kind: AlertKind::Drawdown,
                message: format!("drawdown {:.1}%", drawdown * 100.0),
            });
        }

        let capital_ratio = ratio(ledger.capital(), ledger.start_capital());
        if capital_ratio <= t.capital_critical {
            alerts.push(Alert {
                severity: AlertSeverity::Critical,
                kind: AlertKind::CapitalFloor,
                message: format!(
                    "capital down to {:.1}% of starting capital",
                    capital_ratio * 100.0
                ),
            });
        } else if capital_ratio <= t.capital_low {
            alerts.push(Alert {
                severity: AlertSeverity::Warning,
                kind: AlertKind::CapitalFloor,
                message: format!(
                    "capital down to {:.1}% of starting capital",
                    capital_ratio * 100.0
                ),
            });
        }

        let exposure = ledger.metrics().exposure;
        if exposure >= t.exposure_critical {
            alerts.push(Alert {
                severity: AlertSeverity::Critical,
                kind: AlertKind::Exposure,
                message: format!("exposure {:.2}x capital", exposure),
            });
        } else if exposure >= t.exposure_high {
            alerts.push(Alert {
                severity: AlertSeverity::Warning,
                kind: AlertKind::Exposure,
                message: format!("exposure {:.2}x capital", exposure),
            });
        }

        alerts
    }

    /// Emit alerts through tracing at the matching level.
    pub fn log_alerts(alerts: &[Alert]) {
        for alert in alerts {
            match alert.severity {
                AlertSeverity::Warning => warn!(kind = ?alert.kind, "{}", alert.message),
                AlertSeverity::Critical => error!(kind = ?alert.kind, "{}", alert.message),
            }
        }
    }
}

fn ratio(numerator: Decimal, denominator: Decimal) -> f64 {
    if denominator <= Decimal::ZERO {
        return 1.0;
    }
    (numerator / denominator).to_f64().unwrap_or(1.0)
}
