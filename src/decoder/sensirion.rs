//! Sensirion gadget advertisement format.
//!
//! Layout of the manufacturer-specific data (company id removed):
//!
//! | bytes | content                                   |
//! |-------|-------------------------------------------|
//! | 0     | advertisement type, `0x00` for samples    |
//! | 1     | sample type, selects the field layout     |
//! | 2..4  | device tag (low bytes of the address)     |
//! | 4..   | little-endian `u16` samples, layout order |

use super::{DecodeError, DecodeStrategy, Payload, SensorFields};

/// Sensirion AG company identifier.
pub const SENSIRION_MANUFACTURER_ID: u16 = 0x06D5;

/// Sensirion company id as it appears on air (little-endian), for advertisement monitors.
pub const SENSIRION_MANUFACTURER_ID_BYTES: [u8; 2] = SENSIRION_MANUFACTURER_ID.to_le_bytes();

const SAMPLE_ADVERTISEMENT: u8 = 0x00;
const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Temperature,
    Humidity,
    Co2,
}

fn layout(sample_type: u8) -> Option<&'static [Field]> {
    match sample_type {
        3 | 4 => Some(&[Field::Temperature, Field::Humidity]),
        8 => Some(&[Field::Temperature, Field::Humidity, Field::Co2]),
        _ => None,
    }
}

/// Decoder for Sensirion manufacturer advertisements.
#[derive(Debug, Default, Clone, Copy)]
pub struct SensirionDecoder;

impl DecodeStrategy for SensirionDecoder {
    fn decode(&self, payload: &Payload) -> Result<SensorFields, DecodeError> {
        match payload {
            Payload::Advertisement {
                manufacturer_id,
                data,
            } => decode_manufacturer_data(*manufacturer_id, data),
            Payload::Notification(_) => Err(DecodeError::UnsupportedAdvertisement(
                "notification payload has no manufacturer framing".into(),
            )),
        }
    }
}

/// Decode Sensirion manufacturer data into sensor fields.
///
/// # Errors
/// [`DecodeError::UnsupportedAdvertisement`] when the company id is not Sensirion's,
/// the advertisement or sample type is unknown, or the length does not match the layout.
pub fn decode_manufacturer_data(
    manufacturer_id: u16,
    data: &[u8],
) -> Result<SensorFields, DecodeError> {
    if manufacturer_id != SENSIRION_MANUFACTURER_ID {
        return Err(DecodeError::UnsupportedAdvertisement(format!(
            "manufacturer id 0x{manufacturer_id:04X}"
        )));
    }

    let (&advertisement_type, &sample_type) = match data {
        [a, s, ..] => (a, s),
        _ => {
            return Err(DecodeError::UnsupportedAdvertisement(format!(
                "{} byte payload is shorter than the header",
                data.len()
            )));
        }
    };

    if advertisement_type != SAMPLE_ADVERTISEMENT {
        return Err(DecodeError::UnsupportedAdvertisement(format!(
            "advertisement type {advertisement_type}"
        )));
    }

    let fields = layout(sample_type).ok_or_else(|| {
        DecodeError::UnsupportedAdvertisement(format!("sample type {sample_type}"))
    })?;

    let expected = HEADER_LEN + 2 * fields.len();
    if data.len() != expected {
        return Err(DecodeError::UnsupportedAdvertisement(format!(
            "sample type {sample_type} expects {expected} bytes, got {}",
            data.len()
        )));
    }

    let mut decoded = SensorFields::default();
    for (field, raw) in fields.iter().zip(data[HEADER_LEN..].chunks_exact(2)) {
        let raw = u16::from_le_bytes([raw[0], raw[1]]);
        match field {
            Field::Temperature => decoded.temperature_c = Some(temperature_from_raw(raw)),
            Field::Humidity => decoded.humidity_pct = Some(humidity_from_raw(raw)),
            Field::Co2 => decoded.co2_ppm = Some(raw),
        }
    }

    Ok(decoded)
}

fn temperature_from_raw(raw: u16) -> f64 {
    round_tenth(-45.0 + 175.0 * f64::from(raw) / 65535.0)
}

fn humidity_from_raw(raw: u16) -> f64 {
    round_tenth(100.0 * f64::from(raw) / 65535.0)
}

#[inline]
fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
