use crate::decoder::{Payload, RadioEvent};
use crate::reading::{Reading, Source};
use chrono::{DateTime, TimeDelta, Utc};

/// A stable link-layer address for unit tests.
pub const TEST_ADDRESS: &str = "C4:5D:83:A6:7F:7E";

/// 2026-01-01T00:00:00Z
pub fn test_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_767_225_600, 0).unwrap_or_default()
}

/// Sensirion sample-type 8 advertisement: 27.5 °C, 44.7 %RH, 814 ppm.
pub const ADVERTISEMENT: [u8; 10] = [0x00, 0x08, 0x7f, 0x7e, 0x0a, 0x6a, 0x78, 0x72, 0x2e, 0x03];

/// 20-byte notification: 25.507 °C, 24.368 %RH, 497 ppm.
pub const NOTIFICATION: [u8; 20] = [
    0x02, 0x00, 0xa3, 0x63, 0x30, 0x5f, 0xef, 0x01, 0x00, 0x00, 0x9d, 0x63, 0x7d, 0x5f, 0xf1,
    0x01, 0x00, 0x00, 0x00, 0x00,
];

/// Build a `Reading` with every optional field set to `None`.
///
/// Tests can override just the fields they care about.
pub fn base_reading(timestamp: DateTime<Utc>) -> Reading {
    Reading {
        timestamp,
        co2_ppm: None,
        temperature_c: None,
        humidity_pct: None,
        rssi: None,
        raw_data: Vec::new(),
        source: Source::Advertisement,
    }
}

/// A CO2-only reading `minutes` after `test_time()`.
pub fn co2_reading(minutes: i64, ppm: u16) -> Reading {
    let mut reading = base_reading(at_minute(minutes));
    reading.co2_ppm = Some(ppm);
    reading
}

/// `test_time()` plus `minutes`.
pub fn at_minute(minutes: i64) -> DateTime<Utc> {
    test_time() + TimeDelta::minutes(minutes)
}

pub fn advertisement_event(data: &[u8]) -> RadioEvent {
    RadioEvent {
        address: TEST_ADDRESS.to_string(),
        name: Some("MyCO2".to_string()),
        rssi: Some(-67),
        payload: Payload::Advertisement {
            manufacturer_id: crate::decoder::sensirion::SENSIRION_MANUFACTURER_ID,
            data: data.to_vec(),
        },
    }
}

pub fn notification_event(data: &[u8]) -> RadioEvent {
    RadioEvent {
        address: TEST_ADDRESS.to_string(),
        name: None,
        rssi: None,
        payload: Payload::Notification(data.to_vec()),
    }
}

/// A per-process path in the system temp directory.
pub fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("myco2-{}-{name}", std::process::id()))
}

/// Sink that keeps every message it is given.
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: std::sync::Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl crate::notify::NotificationSink for RecordingSink {
    fn send_message(&self, text: String) -> crate::notify::SendFuture<'_> {
        self.messages.lock().unwrap().push(text);
        Box::pin(async { Ok(()) })
    }
}

/// Sink whose transport always fails.
#[derive(Debug, Default)]
pub struct FailingSink {
    attempts: std::sync::atomic::AtomicUsize,
}

impl FailingSink {
    pub fn attempts(&self) -> usize {
        self.attempts.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl crate::notify::NotificationSink for FailingSink {
    fn send_message(&self, _text: String) -> crate::notify::SendFuture<'_> {
        self.attempts
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Box::pin(async { Err(crate::notify::NotifyError::Transport("unreachable".into())) })
    }
}

/// Store whose backend is gone.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStore;

impl crate::store::ReadingStore for UnavailableStore {
    fn append<'a>(&'a self, _reading: &'a Reading) -> crate::store::StoreFuture<'a, i64> {
        Box::pin(async {
            Err(crate::store::StoreError::Unavailable(
                "database is offline".into(),
            ))
        })
    }

    fn query_range(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> crate::store::StoreFuture<'_, Vec<crate::store::StoredReading>> {
        Box::pin(async {
            Err(crate::store::StoreError::Unavailable(
                "database is offline".into(),
            ))
        })
    }
}
