//! Downsampling of stored readings into chart-ready buckets.

use crate::reading::{Metric, Reading};
use crate::store::{ReadingStore, StoreError};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AggregationError {
    #[error("Point budget must be at least 1")]
    ZeroBudget,
    #[error("Unknown span '{0}', expected one of 1h, 6h, 24h, 48h")]
    UnknownSpan(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Supported history windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Span {
    OneHour,
    SixHours,
    Day,
    TwoDays,
}

impl Span {
    pub const ALL: [Span; 4] = [Span::OneHour, Span::SixHours, Span::Day, Span::TwoDays];

    pub fn hours(&self) -> i64 {
        match self {
            Span::OneHour => 1,
            Span::SixHours => 6,
            Span::Day => 24,
            Span::TwoDays => 48,
        }
    }

    pub fn duration(&self) -> TimeDelta {
        TimeDelta::hours(self.hours())
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}h", self.hours())
    }
}

impl FromStr for Span {
    type Err = AggregationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Span::ALL
            .into_iter()
            .find(|span| span.to_string() == s)
            .ok_or_else(|| AggregationError::UnknownSpan(s.to_string()))
    }
}

/// One downsampled bucket. Means are `None` when no reading carried the metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedPoint {
    /// Bucket start
    pub timestamp: DateTime<Utc>,
    /// Bucket end, exclusive except for the last bucket
    pub end: DateTime<Utc>,
    /// Readings that fell into the bucket
    pub samples: usize,
    pub co2_ppm: Option<f64>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
}

#[derive(Default, Clone, Copy)]
struct Mean {
    sum: f64,
    count: u32,
}

impl Mean {
    fn add(&mut self, value: Option<f64>) {
        if let Some(value) = value {
            self.sum += value;
            self.count += 1;
        }
    }

    fn get(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / f64::from(self.count))
    }
}

/// Largest point budget honoured; bigger budgets are clamped to this.
pub const MAX_POINTS: usize = 10_000;

#[derive(Default, Clone, Copy)]
struct Bucket {
    samples: usize,
    means: [Mean; 3],
}

/// Partition `[now - span, now]` into at most `max_points` equal-width buckets and
/// average each metric of `readings` per bucket.
///
/// Width is `ceil(span / max_points)` milliseconds; the last bucket is clipped to end at
/// `now`. Readings outside the span are ignored. Budgets above [`MAX_POINTS`] are
/// clamped.
pub fn aggregate<'a>(
    readings: impl IntoIterator<Item = &'a Reading>,
    now: DateTime<Utc>,
    span: Span,
    max_points: usize,
) -> Result<Vec<AggregatedPoint>, AggregationError> {
    if max_points == 0 {
        return Err(AggregationError::ZeroBudget);
    }
    let max_points = max_points.min(MAX_POINTS);

    let span_ms = span.duration().num_milliseconds().unsigned_abs();
    let width_ms = span_ms.div_ceil(max_points as u64);
    let count = span_ms.div_ceil(width_ms) as usize;
    let start = now - span.duration();

    let mut buckets = vec![Bucket::default(); count];
    for reading in readings {
        if reading.timestamp < start || reading.timestamp > now {
            continue;
        }
        let offset_ms = (reading.timestamp - start).num_milliseconds().unsigned_abs();
        // `now` itself belongs to the last bucket.
        let index = ((offset_ms / width_ms) as usize).min(count - 1);

        let bucket = &mut buckets[index];
        bucket.samples += 1;
        for (mean, metric) in bucket.means.iter_mut().zip(Metric::ALL) {
            mean.add(reading.value(metric));
        }
    }

    let width = TimeDelta::milliseconds(width_ms as i64);
    Ok(buckets
        .into_iter()
        .enumerate()
        .map(|(i, bucket)| {
            let timestamp = start + width * i as i32;
            let [co2, temperature, humidity] = bucket.means;
            AggregatedPoint {
                timestamp,
                end: (timestamp + width).min(now),
                samples: bucket.samples,
                co2_ppm: co2.get(),
                temperature_c: temperature.get(),
                humidity_pct: humidity.get(),
            }
        })
        .collect())
}

/// Load the last `span` of readings from `store` and aggregate them.
pub async fn history(
    store: &dyn ReadingStore,
    span: Span,
    max_points: usize,
    now: DateTime<Utc>,
) -> Result<Vec<AggregatedPoint>, AggregationError> {
    if max_points == 0 {
        return Err(AggregationError::ZeroBudget);
    }
    let stored = store.query_range(now - span.duration(), now).await?;
    aggregate(stored.iter().map(|s| &s.reading), now, span, max_points)
}
