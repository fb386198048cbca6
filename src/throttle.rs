//! Per-device sampling limit.
//!
//! The sensor advertises several times per second while its values change slowly.
//! A [`Throttle`] admits at most one event per device and radio path per interval.

use crate::reading::Source;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last_admitted: HashMap<(String, Source), Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Throttle {
            interval,
            last_admitted: HashMap::new(),
        }
    }

    /// Whether an event from `address` on `source` arriving at `now` should be processed.
    ///
    /// Rejected events do not restart the interval.
    pub fn admit(&mut self, address: &str, source: Source, now: Instant) -> bool {
        let key = (address.to_string(), source);
        match self.last_admitted.get(&key) {
            Some(last) if now.saturating_duration_since(*last) < self.interval => false,
            _ => {
                self.last_admitted.insert(key, now);
                true
            }
        }
    }
}

const UNITS: [(&str, u64); 4] = [("ms", 1), ("s", 1_000), ("m", 60_000), ("h", 3_600_000)];

/// Parse `500ms`, `10s`, `5m`, `1h`. A bare number is seconds.
///
/// ```
/// use myco2_listener::throttle::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    // "ms" has to be tried before "m" and "s".
    let (number, millis_per_unit) = UNITS
        .iter()
        .find_map(|(suffix, factor)| src.strip_suffix(suffix).map(|n| (n, *factor)))
        .unwrap_or((src, 1_000));

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {src}"))?;
    value
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration too large: {src}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "C4:5D:83:A6:7F:7E";

    #[test]
    fn test_first_event_admitted() {
        let mut throttle = Throttle::new(Duration::from_secs(10));
        assert!(throttle.admit(ADDR, Source::Advertisement, Instant::now()));
    }

    #[test]
    fn test_events_within_interval_dropped() {
        let mut throttle = Throttle::new(Duration::from_secs(10));
        let t0 = Instant::now();
        assert!(throttle.admit(ADDR, Source::Advertisement, t0));
        assert!(!throttle.admit(ADDR, Source::Advertisement, t0 + Duration::from_secs(4)));
        assert!(!throttle.admit(ADDR, Source::Advertisement, t0 + Duration::from_secs(9)));
        // Interval counts from the last admitted event, not the last dropped one.
        assert!(throttle.admit(ADDR, Source::Advertisement, t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_sources_are_throttled_independently() {
        let mut throttle = Throttle::new(Duration::from_secs(10));
        let t0 = Instant::now();
        assert!(throttle.admit(ADDR, Source::Advertisement, t0));
        assert!(throttle.admit(ADDR, Source::Notification, t0));
        assert!(!throttle.admit(ADDR, Source::Notification, t0));
    }

    #[test]
    fn test_devices_are_throttled_independently() {
        let mut throttle = Throttle::new(Duration::from_secs(10));
        let t0 = Instant::now();
        assert!(throttle.admit(ADDR, Source::Advertisement, t0));
        assert!(throttle.admit("11:22:33:44:55:66", Source::Advertisement, t0));
        assert!(!throttle.admit(ADDR, Source::Advertisement, t0));
    }

    #[test]
    fn test_zero_interval_admits_everything() {
        let mut throttle = Throttle::new(Duration::ZERO);
        let t0 = Instant::now();
        assert!(throttle.admit(ADDR, Source::Advertisement, t0));
        assert!(throttle.admit(ADDR, Source::Advertisement, t0));
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration(" 3 s ").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("1d").is_err());
        assert!(parse_duration("99999999999999999h").is_err());
    }
}
