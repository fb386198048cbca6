//! Payload decoding for MyCO2 radio events.
//!
//! Two independent strategies exist, one per radio path: Sensirion manufacturer
//! advertisements and fixed-layout 20-byte connection notifications. The
//! [`PayloadDecoder`] keys them by the event's origin; it never tries one layout and
//! then the other on the same bytes.

pub mod notification;
pub mod sensirion;

use crate::reading::{CO2_VALID_RANGE, Reading, Source};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

pub use notification::NotificationDecoder;
pub use sensirion::SensirionDecoder;

/// Error types for decoding radio payloads.
///
/// None of these are fatal: mixed device traffic produces them during normal scanning.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Not a MyCO2 advertisement, or not a layout we understand
    #[error("Unsupported advertisement: {0}")]
    UnsupportedAdvertisement(String),
    /// Notification payload with the wrong length
    #[error("Malformed notification: expected {expected} bytes, got {actual}")]
    MalformedNotification { expected: usize, actual: usize },
    /// Decoding succeeded but produced no usable value
    #[error("Invalid reading: no CO2, temperature or humidity value")]
    InvalidReading,
    /// No strategy registered for the event's origin
    #[error("No decoder available for {0} payloads")]
    NoDecoder(Source),
}

/// Payload bytes as delivered by the radio layer, tagged with their origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Manufacturer-specific advertisement data (company id stripped)
    Advertisement { manufacturer_id: u16, data: Vec<u8> },
    /// Raw value from a data-notification characteristic
    Notification(Vec<u8>),
}

impl Payload {
    /// Radio path this payload arrived on, which selects its decoder.
    ///
    /// # Example
    /// ```
    /// use myco2_listener::{Payload, Source};
    ///
    /// assert_eq!(Payload::Notification(vec![0; 20]).source(), Source::Notification);
    /// ```
    pub fn source(&self) -> Source {
        match self {
            Payload::Advertisement { .. } => Source::Advertisement,
            Payload::Notification(_) => Source::Notification,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Payload::Advertisement { data, .. } => data,
            Payload::Notification(data) => data,
        }
    }
}

/// One event from the radio layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioEvent {
    /// Link-layer address, treated as opaque
    pub address: String,
    /// Advertised device name, if known
    pub name: Option<String>,
    /// Signal strength in dBm
    pub rssi: Option<i16>,
    pub payload: Payload,
}

/// Values extracted by a strategy, before range checks and validation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorFields {
    pub co2_ppm: Option<u16>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
}

/// A decoding strategy for one radio path.
///
/// Implementations must be pure: the same payload always yields the same fields.
pub trait DecodeStrategy: Send + Sync {
    fn decode(&self, payload: &Payload) -> Result<SensorFields, DecodeError>;
}

/// Origin-keyed set of decode strategies.
pub struct PayloadDecoder {
    strategies: HashMap<Source, Box<dyn DecodeStrategy>>,
}

impl PayloadDecoder {
    /// A decoder without any strategies.
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// A decoder for connection notifications only, used when the vendor
    /// advertisement format is unavailable.
    pub fn notification_only() -> Self {
        Self::empty().with_strategy(Source::Notification, NotificationDecoder)
    }

    /// Register `strategy` for payloads arriving on `source`, replacing any previous one.
    pub fn with_strategy(
        mut self,
        source: Source,
        strategy: impl DecodeStrategy + 'static,
    ) -> Self {
        self.strategies.insert(source, Box::new(strategy));
        self
    }

    pub fn supports(&self, source: Source) -> bool {
        self.strategies.contains_key(&source)
    }

    /// Decode `event` into a reading stamped with `timestamp`.
    ///
    /// The reading's `source` is the origin whose strategy decoded it. CO2 values
    /// outside [`CO2_VALID_RANGE`] are dropped; if no value survives the decode fails
    /// with [`DecodeError::InvalidReading`].
    pub fn decode(
        &self,
        event: &RadioEvent,
        timestamp: DateTime<Utc>,
    ) -> Result<Reading, DecodeError> {
        let source = event.payload.source();
        let strategy = self
            .strategies
            .get(&source)
            .ok_or(DecodeError::NoDecoder(source))?;
        let fields = strategy.decode(&event.payload)?;

        let reading = Reading {
            timestamp,
            co2_ppm: fields.co2_ppm.filter(|ppm| CO2_VALID_RANGE.contains(ppm)),
            temperature_c: fields.temperature_c,
            humidity_pct: fields.humidity_pct,
            rssi: match source {
                Source::Advertisement => event.rssi,
                Source::Notification => None,
            },
            raw_data: event.payload.bytes().to_vec(),
            source,
        };

        if reading.is_valid() {
            Ok(reading)
        } else {
            Err(DecodeError::InvalidReading)
        }
    }
}

impl Default for PayloadDecoder {
    fn default() -> Self {
        Self::empty()
            .with_strategy(Source::Advertisement, SensirionDecoder)
            .with_strategy(Source::Notification, NotificationDecoder)
    }
}
