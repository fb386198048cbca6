//! Benchmarks for the MyCO2 ingestion pipeline.
//!
//! Covers payload decoding on both radio paths, the full decode -> store -> evaluate
//! loop against an in-memory SQLite store, and history downsampling.

use chrono::{DateTime, TimeDelta, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use myco2_listener::decoder::sensirion::SENSIRION_MANUFACTURER_ID;
use myco2_listener::{
    AlertConfig, AlertSettings, IngestionCoordinator, Metric, Payload, PayloadDecoder,
    RadioEvent, Reading, Source, Span, SqliteStore, aggregate,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Sensirion sample-type 8 advertisement
const ADVERTISEMENT: [u8; 10] = [0x00, 0x08, 0x7f, 0x7e, 0x0a, 0x6a, 0x78, 0x72, 0x2e, 0x03];

/// 20-byte data notification
const NOTIFICATION: [u8; 20] = [
    0x02, 0x00, 0xa3, 0x63, 0x30, 0x5f, 0xef, 0x01, 0x00, 0x00, 0x9d, 0x63, 0x7d, 0x5f, 0xf1,
    0x01, 0x00, 0x00, 0x00, 0x00,
];

fn advertisement_event() -> RadioEvent {
    RadioEvent {
        address: "C4:5D:83:A6:7F:7E".to_string(),
        name: Some("MyCO2".to_string()),
        rssi: Some(-67),
        payload: Payload::Advertisement {
            manufacturer_id: SENSIRION_MANUFACTURER_ID,
            data: ADVERTISEMENT.to_vec(),
        },
    }
}

fn notification_event() -> RadioEvent {
    RadioEvent {
        address: "C4:5D:83:A6:7F:7E".to_string(),
        name: None,
        rssi: None,
        payload: Payload::Notification(NOTIFICATION.to_vec()),
    }
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let decoder = PayloadDecoder::default();
    let now = Utc::now();

    group.throughput(Throughput::Elements(1));
    let event = advertisement_event();
    group.bench_function("advertisement", |b| {
        b.iter(|| black_box(decoder.decode(black_box(&event), now)))
    });

    let event = notification_event();
    group.bench_function("notification", |b| {
        b.iter(|| black_box(decoder.decode(black_box(&event), now)))
    });

    group.finish();
}

/// decode -> store -> evaluate for a batch of events, with CO2 alerts enabled
fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");
    let rt = Runtime::new().unwrap();

    let mut settings = AlertSettings::default();
    settings.enabled = true;
    settings
        .thresholds
        .insert(Metric::Co2, AlertConfig::new(None, Some(1000.0)));

    for batch_size in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &size| {
                let store = Arc::new(SqliteStore::open_in_memory().unwrap());
                let coordinator = IngestionCoordinator::new(store, &settings);
                let events: Vec<RadioEvent> = (0..size)
                    .map(|i| {
                        if i % 2 == 0 {
                            advertisement_event()
                        } else {
                            notification_event()
                        }
                    })
                    .collect();

                b.iter(|| {
                    rt.block_on(async {
                        for event in &events {
                            black_box(coordinator.handle(event).await.unwrap());
                        }
                    })
                })
            },
        );
    }

    group.finish();
}

fn readings(now: DateTime<Utc>, span: Span, every: TimeDelta) -> Vec<Reading> {
    let count = span.duration().num_seconds() / every.num_seconds();
    (0..count)
        .map(|i| Reading {
            timestamp: now - span.duration() + every * i as i32,
            co2_ppm: Some(400 + (i % 600) as u16),
            temperature_c: Some(21.5),
            humidity_pct: Some(45.0),
            rssi: Some(-70),
            raw_data: Vec::new(),
            source: Source::Advertisement,
        })
        .collect()
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");
    let now = Utc::now();

    for span in [Span::SixHours, Span::TwoDays] {
        let data = readings(now, span, TimeDelta::seconds(10));
        group.throughput(Throughput::Elements(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(span), &data, |b, data| {
            b.iter(|| black_box(aggregate(data, now, span, 100).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decode, bench_ingest, bench_aggregate);
criterion_main!(benches);
