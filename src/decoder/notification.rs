//! Fixed-layout 20-byte data notification.
//!
//! All fields little-endian:
//! - bytes 2..4: temperature, milli-degrees Celsius
//! - bytes 4..6: relative humidity, milli-percent
//! - bytes 14..16: CO2 in ppm
//!
//! The remaining bytes (sequence counter, duplicated samples) are not decoded.

use super::{DecodeError, DecodeStrategy, Payload, SensorFields};
use std::ops::RangeInclusive;

/// Exact length of a data notification.
pub const NOTIFICATION_LEN: usize = 20;

const TEMPERATURE_PLAUSIBLE: RangeInclusive<f64> = 0.0..=50.0;
const HUMIDITY_PLAUSIBLE: RangeInclusive<f64> = 0.0..=100.0;

/// Decoder for connection data notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotificationDecoder;

impl DecodeStrategy for NotificationDecoder {
    fn decode(&self, payload: &Payload) -> Result<SensorFields, DecodeError> {
        decode_notification(payload.bytes())
    }
}

/// Decode a 20-byte notification.
///
/// Temperatures outside 0-50 °C and humidity outside 0-100 % are treated as absent.
///
/// # Errors
/// [`DecodeError::MalformedNotification`] if `data` is not exactly 20 bytes.
pub fn decode_notification(data: &[u8]) -> Result<SensorFields, DecodeError> {
    let data: &[u8; NOTIFICATION_LEN] =
        data.try_into()
            .map_err(|_| DecodeError::MalformedNotification {
                expected: NOTIFICATION_LEN,
                actual: data.len(),
            })?;

    let le = |offset: usize| u16::from_le_bytes([data[offset], data[offset + 1]]);

    let temperature_c = f64::from(le(2)) / 1000.0;
    let humidity_pct = f64::from(le(4)) / 1000.0;

    Ok(SensorFields {
        co2_ppm: Some(le(14)),
        temperature_c: Some(temperature_c).filter(|t| TEMPERATURE_PLAUSIBLE.contains(t)),
        humidity_pct: Some(humidity_pct).filter(|h| HUMIDITY_PLAUSIBLE.contains(h)),
    })
}
