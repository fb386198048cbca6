//! Edge-triggered threshold evaluation.

use super::{AlertConfig, AlertEvent, AlertKind, AlertSettings, AlertState};
use crate::reading::{Metric, Reading};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Result of evaluating one value against one metric's config.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Config to store in place of the one passed in
    pub config: AlertConfig,
    pub event: Option<AlertEvent>,
}

/// Evaluate `value` for `metric` observed at `at`.
///
/// | breached | state before | state after | event         |
/// |----------|--------------|-------------|---------------|
/// | yes      | normal       | alerting    | breach        |
/// | yes      | alerting     | alerting    | none          |
/// | no       | alerting     | normal      | recovery (*)  |
/// | no       | normal       | normal      | none          |
///
/// (*) only when `recovery_notices` is set.
///
/// A disabled config is returned untouched. A reading no newer than
/// `last_evaluated_at` is a replay and is ignored, so evaluation is idempotent per
/// `(metric, timestamp)`.
pub fn evaluate(
    config: &AlertConfig,
    metric: Metric,
    value: f64,
    at: DateTime<Utc>,
    recovery_notices: bool,
) -> Evaluation {
    let replay = config.last_evaluated_at.is_some_and(|last| at <= last);
    if !config.enabled || replay {
        return Evaluation {
            config: config.clone(),
            event: None,
        };
    }

    let breach = config.breached_bound(value);
    let mut next = config.clone();
    next.last_evaluated_at = Some(at);

    let kind = match (breach, config.last_alert_state) {
        (Some((bound, threshold)), AlertState::Normal) => {
            next.last_alert_state = AlertState::Alerting;
            Some(AlertKind::Breach { bound, threshold })
        }
        (None, AlertState::Alerting) => {
            next.last_alert_state = AlertState::Normal;
            recovery_notices.then_some(AlertKind::Recovery)
        }
        (Some(_), AlertState::Alerting) | (None, AlertState::Normal) => None,
    };

    Evaluation {
        config: next,
        event: kind.map(|kind| AlertEvent {
            metric,
            kind,
            value,
            timestamp: at,
        }),
    }
}

/// Outcome of evaluating a whole reading.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingEvaluation {
    pub events: Vec<AlertEvent>,
    /// Whether any metric's alert state changed and should be persisted
    pub state_changed: bool,
}

/// Owner of the per-metric alert state.
///
/// Each metric sits behind its own lock, so concurrent evaluations of the same
/// metric serialize while different metrics proceed independently.
#[derive(Debug)]
pub struct ThresholdEvaluator {
    enabled: bool,
    recovery_notices: bool,
    metrics: BTreeMap<Metric, Mutex<AlertConfig>>,
}

fn lock(config: &Mutex<AlertConfig>) -> MutexGuard<'_, AlertConfig> {
    // Evaluation swaps in a whole new config, so a poisoned value is still consistent.
    config.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ThresholdEvaluator {
    pub fn new(settings: &AlertSettings) -> Self {
        Self {
            enabled: settings.enabled,
            recovery_notices: settings.recovery_notices,
            metrics: settings
                .thresholds
                .iter()
                .map(|(metric, config)| (*metric, Mutex::new(config.clone())))
                .collect(),
        }
    }

    /// Evaluate every metric present in `reading` that has an enabled config.
    pub fn evaluate_reading(&self, reading: &Reading) -> ReadingEvaluation {
        let mut outcome = ReadingEvaluation::default();
        if !self.enabled {
            return outcome;
        }

        for (metric, config) in &self.metrics {
            let Some(value) = reading.value(*metric) else {
                continue;
            };

            let mut guard = lock(config);
            let evaluation = evaluate(
                &guard,
                *metric,
                value,
                reading.timestamp,
                self.recovery_notices,
            );

            outcome.state_changed |=
                evaluation.config.last_alert_state != guard.last_alert_state;
            *guard = evaluation.config;
            outcome.events.extend(evaluation.event);
        }

        outcome
    }

    /// Update one metric's switch and bounds, keeping its alert state.
    pub fn configure(
        &mut self,
        metric: Metric,
        enabled: bool,
        threshold_low: Option<f64>,
        threshold_high: Option<f64>,
    ) {
        let config = self.metrics.entry(metric).or_default();
        let config = config.get_mut().unwrap_or_else(|p| p.into_inner());
        config.enabled = enabled;
        config.threshold_low = threshold_low;
        config.threshold_high = threshold_high;
    }

    /// Current config of every metric.
    pub fn snapshot(&self) -> BTreeMap<Metric, AlertConfig> {
        self.metrics
            .iter()
            .map(|(metric, config)| (*metric, lock(config).clone()))
            .collect()
    }

    /// Settings document reflecting the current alert state.
    pub fn to_settings(&self) -> AlertSettings {
        AlertSettings {
            enabled: self.enabled,
            recovery_notices: self.recovery_notices,
            thresholds: self.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{Bound, settings::AlertSettings};
    use crate::test_utils::{at_minute, base_reading, co2_reading};
    use std::sync::Arc;

    fn co2_settings(recovery_notices: bool) -> AlertSettings {
        let mut settings = AlertSettings {
            enabled: true,
            recovery_notices,
            thresholds: BTreeMap::new(),
        };
        settings
            .thresholds
            .insert(Metric::Co2, AlertConfig::new(None, Some(1000.0)));
        settings
    }

    fn fired_at(evaluator: &ThresholdEvaluator, values: &[u16]) -> Vec<(usize, AlertKind)> {
        values
            .iter()
            .enumerate()
            .flat_map(|(i, ppm)| {
                evaluator
                    .evaluate_reading(&co2_reading(i as i64, *ppm))
                    .events
                    .into_iter()
                    .map(move |event| (i, event.kind))
            })
            .collect()
    }

    #[test]
    fn test_alerts_on_each_low_to_high_transition() {
        let evaluator = ThresholdEvaluator::new(&co2_settings(false));
        let fired = fired_at(&evaluator, &[950, 1050, 1100, 980, 1200]);

        let breach = AlertKind::Breach {
            bound: Bound::High,
            threshold: 1000.0,
        };
        assert_eq!(fired, vec![(1, breach), (4, breach)]);
    }

    #[test]
    fn test_sustained_breach_alerts_once_and_recovers_once() {
        let evaluator = ThresholdEvaluator::new(&co2_settings(true));
        let fired = fired_at(
            &evaluator,
            &[900, 1100, 1150, 1200, 1250, 1300, 1350, 900, 850],
        );

        assert_eq!(fired.len(), 2);
        assert!(matches!(fired[0], (1, AlertKind::Breach { .. })));
        assert_eq!(fired[1], (7, AlertKind::Recovery));
    }

    #[test]
    fn test_recovery_is_silent_by_default() {
        let evaluator = ThresholdEvaluator::new(&co2_settings(false));
        let fired = fired_at(&evaluator, &[1100, 900]);
        assert_eq!(fired.len(), 1);
        assert_eq!(
            evaluator.snapshot()[&Metric::Co2].last_alert_state,
            AlertState::Normal
        );
    }

    #[test]
    fn test_replayed_reading_does_not_realert() {
        let evaluator = ThresholdEvaluator::new(&co2_settings(false));
        let reading = co2_reading(0, 1500);

        assert_eq!(evaluator.evaluate_reading(&reading).events.len(), 1);
        // Drop back to normal, then replay the first breaching reading.
        evaluator.evaluate_reading(&co2_reading(1, 500));
        let replay = evaluator.evaluate_reading(&reading);
        assert!(replay.events.is_empty());
        assert!(!replay.state_changed);
        assert_eq!(
            evaluator.snapshot()[&Metric::Co2].last_alert_state,
            AlertState::Normal
        );
    }

    #[test]
    fn test_metrics_alert_independently() {
        let mut settings = co2_settings(false);
        settings
            .thresholds
            .insert(Metric::Temperature, AlertConfig::new(Some(10.0), Some(30.0)));
        settings
            .thresholds
            .insert(Metric::Humidity, AlertConfig::new(Some(30.0), Some(70.0)));
        let evaluator = ThresholdEvaluator::new(&settings);

        let mut reading = base_reading(at_minute(0));
        reading.co2_ppm = Some(1500);
        reading.temperature_c = Some(35.0);
        reading.humidity_pct = Some(50.0);

        let outcome = evaluator.evaluate_reading(&reading);
        let metrics: Vec<_> = outcome.events.iter().map(|e| e.metric).collect();
        assert_eq!(metrics, vec![Metric::Co2, Metric::Temperature]);
        assert!(outcome.state_changed);
    }

    #[test]
    fn test_low_bound_breach() {
        let config = AlertConfig::new(Some(30.0), Some(70.0));
        let evaluation = evaluate(&config, Metric::Humidity, 25.0, at_minute(0), false);
        assert_eq!(
            evaluation.event.map(|e| e.kind),
            Some(AlertKind::Breach {
                bound: Bound::Low,
                threshold: 30.0
            })
        );
        assert_eq!(evaluation.config.last_alert_state, AlertState::Alerting);
    }

    #[test]
    fn test_disabled_metric_is_untouched() {
        let mut config = AlertConfig::new(None, Some(1000.0));
        config.enabled = false;
        let evaluation = evaluate(&config, Metric::Co2, 5000.0, at_minute(0), true);
        assert_eq!(evaluation.config, config);
        assert_eq!(evaluation.event, None);
    }

    #[test]
    fn test_master_switch_off_evaluates_nothing() {
        let mut settings = co2_settings(false);
        settings.enabled = false;
        let evaluator = ThresholdEvaluator::new(&settings);

        let outcome = evaluator.evaluate_reading(&co2_reading(0, 5000));
        assert!(outcome.events.is_empty());
        assert_eq!(
            evaluator.snapshot()[&Metric::Co2].last_alert_state,
            AlertState::Normal
        );
    }

    #[test]
    fn test_absent_metric_is_skipped() {
        let evaluator = ThresholdEvaluator::new(&co2_settings(false));
        let mut reading = base_reading(at_minute(0));
        reading.temperature_c = Some(100.0);
        assert_eq!(evaluator.evaluate_reading(&reading), ReadingEvaluation::default());
    }

    #[test]
    fn test_configure_keeps_alert_state() {
        let mut evaluator = ThresholdEvaluator::new(&co2_settings(false));
        evaluator.evaluate_reading(&co2_reading(0, 1500));

        evaluator.configure(Metric::Co2, true, None, Some(1200.0));
        let config = &evaluator.snapshot()[&Metric::Co2];
        assert_eq!(config.threshold_high, Some(1200.0));
        assert_eq!(config.last_alert_state, AlertState::Alerting);

        // Still breached against the new bound: no second alert.
        assert!(
            evaluator
                .evaluate_reading(&co2_reading(1, 1300))
                .events
                .is_empty()
        );
    }

    #[test]
    fn test_concurrent_evaluations_alert_once() {
        let evaluator = Arc::new(ThresholdEvaluator::new(&co2_settings(false)));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let evaluator = Arc::clone(&evaluator);
                std::thread::spawn(move || {
                    evaluator
                        .evaluate_reading(&co2_reading(i, 1500))
                        .events
                        .len()
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_to_settings_round_trips_state() {
        let evaluator = ThresholdEvaluator::new(&co2_settings(true));
        evaluator.evaluate_reading(&co2_reading(3, 1500));

        let settings = evaluator.to_settings();
        assert!(settings.recovery_notices);
        let co2 = &settings.thresholds[&Metric::Co2];
        assert_eq!(co2.last_alert_state, AlertState::Alerting);
        assert_eq!(co2.last_evaluated_at, Some(at_minute(3)));
    }
}
