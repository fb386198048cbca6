//! Core application runner for `myco2-listener`.
//!
//! Kept apart from process setup (logging, exit codes) so every mode can be driven
//! from tests with a fake scanner, a recording sink and temporary files.

use crate::aggregation::{self, AggregationError, Span};
use crate::alert::{SettingsError, SettingsFile};
use crate::coordinator::{IngestOutcome, IngestionCoordinator};
use crate::decoder::RadioEvent;
use crate::device::{DeviceFilter, DeviceLabel, label_map};
use crate::notify::{NotificationSink, NotifyError, Notifier, send_test_notification};
use crate::scanner::ScanError;
use crate::store::{SqliteStore, StoreError};
use crate::throttle::Throttle;
use chrono::{TimeDelta, Utc};
use clap::Parser;
use serde_json::json;
use std::future::Future;
use std::io::{self, Write};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Record MyCO2 readings to SQLite and alert when thresholds are crossed.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// SQLite database file for readings
    #[arg(long, env = "MYCO2_DATABASE", default_value = "myco2_data.db")]
    pub database: PathBuf,

    /// Alert settings file (JSON), created with defaults if missing
    #[arg(long, env = "MYCO2_ALERT_CONFIG", default_value = "alert_config.json")]
    pub alert_config: PathBuf,

    /// Human-readable name for a device.
    /// Format: --label C4:5D:83:A6:7F:7E=Office
    #[arg(long = "label", value_parser = crate::device::parse_label, value_name = "LABEL")]
    pub labels: Vec<DeviceLabel>,

    /// Only ingest events from this address
    #[arg(long)]
    pub address: Option<String>,

    /// Only ingest events whose advertised name contains this (case-insensitive)
    #[arg(long)]
    pub name: Option<String>,

    /// Ingest at most one event per device and radio path per interval.
    /// Accepts duration with suffix: 500ms, 10s, 1m, 2h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, value_parser = crate::throttle::parse_duration)]
    pub sample_interval: Option<Duration>,

    /// Pending alert notifications kept before new ones are dropped
    #[arg(long, default_value_t = 32)]
    pub notification_queue: usize,

    /// Verbose output, log payloads that fail to decode
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Print the latest reading and 24-hour statistics, then exit
    #[arg(long, conflicts_with_all = ["history", "test_notification"])]
    pub stats: bool,

    /// Print downsampled history for a span (1h, 6h, 24h, 48h), then exit
    #[arg(long, value_name = "SPAN", conflicts_with = "test_notification")]
    pub history: Option<Span>,

    /// Point budget for --history
    #[arg(
        long,
        default_value_t = 100,
        requires = "history",
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new()
            .range(1..=aggregation::MAX_POINTS as u64)
    )]
    pub max_points: usize,

    /// Send a test message through the notification sink, then exit
    #[arg(long)]
    pub test_notification: bool,
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<RadioEvent>, ScanError>> + Send + '_>>;
}

/// Real scanner implementation that delegates to the compiled-in backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<RadioEvent>, ScanError>> + Send + '_>>
    {
        Box::pin(crate::scanner::start_scan())
    }
}

/// Event counts for one monitoring session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub received: usize,
    pub filtered: usize,
    pub throttled: usize,
    pub rejected: usize,
    pub stored: usize,
    pub degraded: usize,
    pub alerts: usize,
}

/// Run the mode selected by `options`. One-shot modes write JSON to `out`.
///
/// # Arguments
/// * `scanner` - Radio source for monitor mode
/// * `sink` - Transport for alert and test notifications
/// * `out` - Destination for `--stats` and `--history` JSON
pub async fn run_with_io(
    options: Options,
    scanner: &dyn Scanner,
    sink: Arc<dyn NotificationSink>,
    out: &mut dyn Write,
) -> Result<RunSummary, RunError> {
    let labels = label_map(&options.labels);

    if options.test_notification {
        let device = options
            .labels
            .first()
            .map_or("MyCO2", |label| label.name.as_str());
        send_test_notification(sink.as_ref(), device).await?;
        info!("Test notification sent");
        return Ok(RunSummary::default());
    }

    let store = SqliteStore::open(&options.database)?;

    if options.stats {
        let latest = store.latest().await?;
        let stats = store.stats_since(Utc::now() - TimeDelta::hours(24)).await?;
        serde_json::to_writer_pretty(&mut *out, &json!({ "latest": latest, "last_24h": stats }))?;
        writeln!(out)?;
        return Ok(RunSummary::default());
    }

    if let Some(span) = options.history {
        let points = aggregation::history(&store, span, options.max_points, Utc::now()).await?;
        serde_json::to_writer_pretty(&mut *out, &points)?;
        writeln!(out)?;
        return Ok(RunSummary::default());
    }

    let settings_file = SettingsFile::new(&options.alert_config);
    let settings = settings_file.load()?;
    if !settings.enabled {
        info!("Alerts are disabled in {}", settings_file.path().display());
    }

    let (notifier, notifier_task) = Notifier::spawn(sink, options.notification_queue);
    let coordinator = IngestionCoordinator::new(Arc::new(store), &settings)
        .with_settings_file(settings_file)
        .with_notifier(notifier)
        .with_labels(labels);

    let filter = DeviceFilter::new(options.address, options.name);
    let mut throttle = options.sample_interval.map(Throttle::new);
    let mut summary = RunSummary::default();

    let mut events = scanner.start_scan().await?;
    while let Some(event) = events.recv().await {
        summary.received += 1;

        if !filter.accepts(&event) {
            summary.filtered += 1;
            continue;
        }
        if let Some(throttle) = throttle.as_mut()
            && !throttle.admit(&event.address, event.payload.source(), Instant::now())
        {
            summary.throttled += 1;
            continue;
        }

        match coordinator.handle(&event).await {
            Ok(IngestOutcome::Stored { alerts, .. }) => {
                summary.stored += 1;
                summary.alerts += alerts.len();
            }
            Ok(IngestOutcome::Degraded { alerts, .. }) => {
                summary.degraded += 1;
                summary.alerts += alerts.len();
            }
            Err(_) => summary.rejected += 1,
        }
    }

    // Let queued notifications go out before returning.
    drop(coordinator);
    if let Err(e) = notifier_task.await {
        warn!("Notification task ended abnormally: {e}");
    }

    info!(?summary, "Radio layer closed");
    Ok(summary)
}
