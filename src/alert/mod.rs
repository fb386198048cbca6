//! Threshold alerting.
//!
//! Alerts are edge-triggered: a metric notifies once when it enters a breached
//! state and stays quiet while the breach lasts. Per-metric state lives in
//! [`AlertConfig::last_alert_state`] and is carried through every evaluation.

pub mod evaluator;
pub mod settings;

use crate::reading::Metric;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use evaluator::{Evaluation, ReadingEvaluation, ThresholdEvaluator, evaluate};
pub use settings::{AlertSettings, SettingsError, SettingsFile};

/// Whether a metric is currently outside its bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    #[default]
    Normal,
    Alerting,
}

/// Alert configuration and state for one metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Alert when the value rises above this
    #[serde(default)]
    pub threshold_high: Option<f64>,
    /// Alert when the value drops below this
    #[serde(default)]
    pub threshold_low: Option<f64>,
    #[serde(default)]
    pub last_alert_state: AlertState,
    /// Timestamp of the newest reading evaluated against this config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_evaluated_at: Option<DateTime<Utc>>,
}

impl AlertConfig {
    pub fn new(threshold_low: Option<f64>, threshold_high: Option<f64>) -> Self {
        Self {
            enabled: true,
            threshold_high,
            threshold_low,
            ..Self::default()
        }
    }

    /// The bound `value` violates, if any. The upper bound is checked first.
    pub fn breached_bound(&self, value: f64) -> Option<(Bound, f64)> {
        match (self.threshold_high, self.threshold_low) {
            (Some(high), _) if value > high => Some((Bound::High, high)),
            (_, Some(low)) if value < low => Some((Bound::Low, low)),
            _ => None,
        }
    }
}

/// Side of the range that was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bound {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum AlertKind {
    /// The metric entered a breached state
    Breach { bound: Bound, threshold: f64 },
    /// The metric returned within its bounds
    Recovery,
}

/// A notification-worthy state transition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlertEvent {
    pub metric: Metric,
    pub kind: AlertKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}
