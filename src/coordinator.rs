//! Per-event ingestion pipeline: decode, evaluate, persist, fan out.

use crate::alert::{
    AlertEvent, AlertSettings, ReadingEvaluation, SettingsFile, ThresholdEvaluator,
};
use crate::decoder::{DecodeError, PayloadDecoder, RadioEvent};
use crate::device::{LabelMap, resolve_label};
use crate::notify::Notifier;
use crate::push::LivePush;
use crate::reading::Reading;
use crate::store::ReadingStore;
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// UTC clock whose stamps are strictly increasing at microsecond resolution.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MonotonicClock {
    pub fn now(&self) -> DateTime<Utc> {
        self.stamp(Utc::now())
    }

    fn stamp(&self, wall: DateTime<Utc>) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        let mut ts = wall.trunc_subsecs(6);
        if let Some(prev) = *last {
            if ts <= prev {
                ts = prev + TimeDelta::microseconds(1);
            }
        }
        *last = Some(ts);
        ts
    }
}

/// What happened to one successfully decoded event.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Persisted under row `id`
    Stored {
        id: i64,
        reading: Reading,
        alerts: Vec<AlertEvent>,
    },
    /// Persisting failed; alerts and live push still ran
    Degraded {
        reading: Reading,
        alerts: Vec<AlertEvent>,
        error: String,
    },
}

impl IngestOutcome {
    pub fn reading(&self) -> &Reading {
        match self {
            IngestOutcome::Stored { reading, .. } | IngestOutcome::Degraded { reading, .. } => {
                reading
            }
        }
    }

    pub fn alerts(&self) -> &[AlertEvent] {
        match self {
            IngestOutcome::Stored { alerts, .. } | IngestOutcome::Degraded { alerts, .. } => {
                alerts
            }
        }
    }
}

/// Runs every radio event through decode, persistence, alerting and live push.
///
/// Built with [`IngestionCoordinator::new`] and the `with_*` methods, then shared by
/// reference: `handle` takes `&self`, so events may be processed concurrently.
///
/// # Example
/// ```
/// use myco2_listener::{AlertSettings, IngestionCoordinator, SqliteStore};
/// use std::sync::Arc;
///
/// let store = Arc::new(SqliteStore::open_in_memory().unwrap());
/// let coordinator = IngestionCoordinator::new(store, &AlertSettings::default());
/// assert!(!coordinator.evaluator().to_settings().enabled);
/// ```
pub struct IngestionCoordinator {
    decoder: PayloadDecoder,
    store: Arc<dyn ReadingStore>,
    evaluator: ThresholdEvaluator,
    settings_file: Option<SettingsFile>,
    notifier: Option<Notifier>,
    push: LivePush,
    labels: LabelMap,
    clock: MonotonicClock,
    /// Held from stamping through evaluation so alert state sees readings in stamp order
    sequence: Mutex<()>,
    /// Serializes settings writes so the newest snapshot lands last
    save_lock: tokio::sync::Mutex<()>,
}

impl IngestionCoordinator {
    /// Coordinator with the default decoders, no notifier and no settings file.
    ///
    /// # Arguments
    /// * `store` - Where readings are persisted
    /// * `settings` - Initial alert switches, thresholds and state
    pub fn new(store: Arc<dyn ReadingStore>, settings: &AlertSettings) -> Self {
        Self {
            decoder: PayloadDecoder::default(),
            store,
            evaluator: ThresholdEvaluator::new(settings),
            settings_file: None,
            notifier: None,
            push: LivePush::new(16),
            labels: LabelMap::new(),
            clock: MonotonicClock::default(),
            sequence: Mutex::new(()),
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_decoder(mut self, decoder: PayloadDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    /// Write alert state back to `file` whenever it changes.
    pub fn with_settings_file(mut self, file: SettingsFile) -> Self {
        self.settings_file = Some(file);
        self
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_push(mut self, push: LivePush) -> Self {
        self.push = push;
        self
    }

    pub fn with_labels(mut self, labels: LabelMap) -> Self {
        self.labels = labels;
        self
    }

    pub fn evaluator(&self) -> &ThresholdEvaluator {
        &self.evaluator
    }

    /// Process one radio event.
    ///
    /// Stamping and alert evaluation happen together before anything is awaited, so
    /// concurrent calls are evaluated in the order their readings were stamped. Only
    /// persistence and fan-out overlap.
    ///
    /// # Arguments
    /// * `event` - Raw payload together with its device address, name and RSSI
    ///
    /// # Returns
    /// * `Ok(IngestOutcome::Stored)` - Reading persisted, alerts raised as needed
    /// * `Ok(IngestOutcome::Degraded)` - Persisting failed; alerting and live push still ran
    /// * `Err(DecodeError)` - Payload rejected; nothing was stored, evaluated or pushed
    pub async fn handle(&self, event: &RadioEvent) -> Result<IngestOutcome, DecodeError> {
        let (reading, evaluation) = self
            .decode_and_evaluate(event)
            .inspect_err(|e| debug!(address = %event.address, "Ignoring payload: {e}"))?;

        let stored = self.store.append(&reading).await;
        if let Err(e) = &stored {
            error!(address = %event.address, "Failed to store reading: {e}");
        }

        if evaluation.state_changed {
            self.save_alert_state().await;
        }

        let device = resolve_label(&event.address, event.name.as_deref(), &self.labels);
        for alert in &evaluation.events {
            info!(device, metric = %alert.metric, value = alert.value, "Threshold alert: {:?}", alert.kind);
            if let Some(notifier) = &self.notifier {
                if let Err(e) = notifier.notify(alert, device) {
                    warn!(device, "Alert notification not sent: {e}");
                }
            }
        }

        self.push.publish(&reading);

        Ok(match stored {
            Ok(id) => IngestOutcome::Stored {
                id,
                reading,
                alerts: evaluation.events,
            },
            Err(e) => IngestOutcome::Degraded {
                reading,
                alerts: evaluation.events,
                error: e.to_string(),
            },
        })
    }

    fn decode_and_evaluate(
        &self,
        event: &RadioEvent,
    ) -> Result<(Reading, ReadingEvaluation), DecodeError> {
        let _order = self.sequence.lock().unwrap_or_else(|p| p.into_inner());
        let reading = self.decoder.decode(event, self.clock.now())?;
        let evaluation = self.evaluator.evaluate_reading(&reading);
        Ok((reading, evaluation))
    }

    /// Write the current alert state on the blocking pool.
    async fn save_alert_state(&self) {
        let Some(file) = self.settings_file.clone() else {
            return;
        };

        let _guard = self.save_lock.lock().await;
        let settings = self.evaluator.to_settings();
        match tokio::task::spawn_blocking(move || file.save(&settings)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to save alert state: {e}"),
            Err(e) => error!("Alert state writer stopped: {e}"),
        }
    }
}
