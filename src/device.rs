//! Device naming and selection.
//!
//! Operators can label sensors (`--label C4:5D:83:A6:7F:7E=Office`) and restrict
//! ingestion to one address or to names containing a substring.

use crate::decoder::RadioEvent;
use std::collections::BTreeMap;

/// Operator-assigned name for a link-layer address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLabel {
    pub address: String,
    pub name: String,
}

pub type LabelMap = BTreeMap<String, String>;

/// Parse `ADDRESS=NAME`.
///
/// ```
/// use myco2_listener::device::parse_label;
///
/// let label = parse_label("C4:5D:83:A6:7F:7E=Office").unwrap();
/// assert_eq!(label.address, "C4:5D:83:A6:7F:7E");
/// assert_eq!(label.name, "Office");
/// ```
pub fn parse_label(src: &str) -> Result<DeviceLabel, String> {
    match src.split_once('=') {
        Some((address, name)) if !address.trim().is_empty() && !name.trim().is_empty() => {
            Ok(DeviceLabel {
                address: address.trim().to_string(),
                name: name.trim().to_string(),
            })
        }
        _ => Err(format!("invalid label '{src}': expected ADDRESS=NAME")),
    }
}

pub fn label_map(labels: &[DeviceLabel]) -> LabelMap {
    labels
        .iter()
        .map(|l| (l.address.clone(), l.name.clone()))
        .collect()
}

/// Name to show for a device: operator label, then advertised name, then the address.
pub fn resolve_label<'a>(
    address: &'a str,
    advertised_name: Option<&'a str>,
    labels: &'a LabelMap,
) -> &'a str {
    labels
        .get(address)
        .map(String::as_str)
        .or(advertised_name.filter(|n| !n.is_empty()))
        .unwrap_or(address)
}

/// Which radio events to ingest. The default accepts everything.
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    address: Option<String>,
    name: Option<String>,
}

impl DeviceFilter {
    pub fn new(address: Option<String>, name: Option<String>) -> Self {
        Self {
            address,
            name: name.map(|n| n.to_lowercase()),
        }
    }

    /// Accept when the address matches exactly or the advertised name contains the
    /// configured substring (case-insensitive).
    pub fn accepts(&self, event: &RadioEvent) -> bool {
        if self.address.is_none() && self.name.is_none() {
            return true;
        }

        let address_matches = self.address.as_deref() == Some(event.address.as_str());
        let name_matches = match (&self.name, &event.name) {
            (Some(wanted), Some(name)) => name.to_lowercase().contains(wanted.as_str()),
            _ => false,
        };
        address_matches || name_matches
    }
}
