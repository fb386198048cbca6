//! Decoded MyCO2 reading and the metrics it carries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// CO2 concentrations outside this range are sensor noise, not readings.
pub const CO2_VALID_RANGE: RangeInclusive<u16> = 300..=10_000;

/// Which radio path a payload arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Broadcast advertisement, no connection required
    Advertisement,
    /// Pushed over an established connection's data channel
    Notification,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Advertisement => "advertisement",
            Source::Notification => "notification",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "advertisement" => Ok(Source::Advertisement),
            "notification" => Ok(Source::Notification),
            _ => Err(format!("unknown reading source: {s}")),
        }
    }
}

/// A monitored quantity. Serialized with the keys used in the alert settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "co2_ppm")]
    Co2,
    #[serde(rename = "temperature_c")]
    Temperature,
    #[serde(rename = "humidity")]
    Humidity,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Co2, Metric::Temperature, Metric::Humidity];

    /// Settings-file key.
    pub fn key(&self) -> &'static str {
        match self {
            Metric::Co2 => "co2_ppm",
            Metric::Temperature => "temperature_c",
            Metric::Humidity => "humidity",
        }
    }

    /// Human-readable name for messages.
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Co2 => "CO2",
            Metric::Temperature => "Temperature",
            Metric::Humidity => "Humidity",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Co2 => "ppm",
            Metric::Temperature => "°C",
            Metric::Humidity => "%",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One decoded sample from the sensor.
///
/// Readings are immutable once decoded. A reading is only valid when at least one
/// of CO2, temperature or humidity is present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// Decode time (UTC, strictly increasing per coordinator)
    pub timestamp: DateTime<Utc>,
    /// Carbon dioxide concentration in ppm
    pub co2_ppm: Option<u16>,
    /// Temperature in Celsius
    pub temperature_c: Option<f64>,
    /// Relative humidity in percent (0-100)
    pub humidity_pct: Option<f64>,
    /// Signal strength in dBm, advertisement readings only
    pub rssi: Option<i16>,
    /// Payload the reading was decoded from
    #[serde(skip)]
    pub raw_data: Vec<u8>,
    /// Path the payload arrived on
    pub source: Source,
}

impl Reading {
    pub fn is_valid(&self) -> bool {
        self.co2_ppm.is_some() || self.temperature_c.is_some() || self.humidity_pct.is_some()
    }

    /// Value of `metric`, if this reading carries it.
    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Co2 => self.co2_ppm.map(f64::from),
            Metric::Temperature => self.temperature_c,
            Metric::Humidity => self.humidity_pct,
        }
    }

    /// `raw_data` as lowercase hex, the form it is persisted in.
    pub fn raw_hex(&self) -> String {
        encode_hex(&self.raw_data)
    }
}

pub fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn decode_hex(src: &str) -> Result<Vec<u8>, String> {
    if src.len() % 2 != 0 {
        return Err(format!("odd-length hex string: {src}"));
    }
    (0..src.len())
        .step_by(2)
        .map(|i| {
            src.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("invalid hex at offset {i}: {src}"))
        })
        .collect()
}
