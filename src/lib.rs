//! `myco2-listener` library.
//!
//! The binary (`src/main.rs`) is responsible for logging setup and process exit codes.
//! The ingestion pipeline lives in [`crate::coordinator`]; [`crate::app`] wires it to
//! the radio layer and the CLI so it can be tested with an injected scanner and sink.

pub mod aggregation;
pub mod alert;
pub mod app;
pub mod coordinator;
pub mod decoder;
pub mod device;
pub mod notify;
pub mod push;
pub mod reading;
pub mod scanner;
pub mod store;
pub mod throttle;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use aggregation::{AggregatedPoint, AggregationError, Span, aggregate};
pub use alert::{AlertConfig, AlertEvent, AlertSettings, AlertState, ThresholdEvaluator};
pub use coordinator::{IngestOutcome, IngestionCoordinator};
pub use decoder::{DecodeError, Payload, PayloadDecoder, RadioEvent};
pub use reading::{Metric, Reading, Source};
pub use scanner::ScanError;
pub use store::{ReadingStore, SqliteStore, StoreError};
pub use throttle::{Throttle, parse_duration};
