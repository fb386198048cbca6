//! Radio layer: turns Bluetooth LE traffic into [`RadioEvent`]s.
//!
//! Scanning only collects raw payloads; decoding happens in the ingestion pipeline.

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::decoder::RadioEvent;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Backend not available (not compiled in)
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Channel buffer size for radio events.
pub const EVENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// Start listening for MyCO2 advertisements.
///
/// Events arrive on the returned channel until the radio layer shuts down.
pub async fn start_scan() -> Result<mpsc::Receiver<RadioEvent>, ScanError> {
    #[cfg(feature = "bluer")]
    return bluer::start_scan().await;

    #[cfg(not(feature = "bluer"))]
    Err(ScanError::BackendNotAvailable("bluer".to_string()))
}
