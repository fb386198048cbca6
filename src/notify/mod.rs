//! Delivery of alert messages to the operator.
//!
//! Messages go through a bounded queue drained by a background task, so a slow or
//! unreachable transport never stalls ingestion. Failed deliveries are logged and
//! dropped.

pub mod message;

use crate::alert::AlertEvent;
use chrono::Utc;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use message::{alert_message, test_message};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotifyError {
    #[error("Notification transport error: {0}")]
    Transport(String),
    #[error("Notification queue is full, message dropped")]
    QueueFull,
    #[error("Notifier has shut down")]
    Closed,
}

pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;

/// A message transport such as a chat bot or mail relay.
///
/// The binary ships [`LogSink`]. A real transport implements this trait and is
/// handed to [`crate::app::run_with_io`] in its place; messages are short HTML
/// (`<b>`, `<i>`) suitable for chat APIs that accept that markup.
///
/// # Example
/// ```
/// use myco2_listener::notify::{NotificationSink, NotifyError, SendFuture};
///
/// /// Posts to a chat bot; the HTTP call is left out here.
/// struct ChatSink {
///     chat_id: String,
/// }
///
/// impl NotificationSink for ChatSink {
///     fn send_message(&self, text: String) -> SendFuture<'_> {
///         Box::pin(async move {
///             if self.chat_id.is_empty() {
///                 return Err(NotifyError::Transport("no chat id configured".into()));
///             }
///             let _request = (&self.chat_id, text);
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait NotificationSink: Send + Sync {
    /// Deliver one message. Failures are logged by the caller and never retried.
    fn send_message(&self, text: String) -> SendFuture<'_>;
}

/// Sink that writes messages to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn send_message(&self, text: String) -> SendFuture<'_> {
        Box::pin(async move {
            info!(target: "myco2::notify", "{text}");
            Ok(())
        })
    }
}

/// Handle to the background notification queue.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<String>,
}

impl Notifier {
    /// Start the background sender. The task ends once every `Notifier` clone is dropped
    /// and the queue is drained.
    pub fn spawn(sink: Arc<dyn NotificationSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<String>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                match sink.send_message(text).await {
                    Ok(()) => debug!("Notification delivered"),
                    Err(e) => warn!("Notification failed: {e}"),
                }
            }
        });

        (Self { tx }, handle)
    }

    /// Queue an alert message for `device` without waiting for delivery.
    pub fn notify(&self, event: &AlertEvent, device: &str) -> Result<(), NotifyError> {
        self.enqueue(alert_message(event, device))
    }

    /// Queue arbitrary message text for the background sender.
    ///
    /// Never waits: ingestion must not stall behind a slow transport.
    ///
    /// # Returns
    /// * `Ok(())` - Message queued
    /// * `Err(NotifyError::QueueFull)` - Queue at capacity; the message is dropped
    /// * `Err(NotifyError::Closed)` - Background sender has stopped
    pub fn enqueue(&self, text: String) -> Result<(), NotifyError> {
        self.tx.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => NotifyError::QueueFull,
            TrySendError::Closed(_) => NotifyError::Closed,
        })
    }
}

/// Send a test message straight through `sink`, bypassing the queue.
pub async fn send_test_notification(
    sink: &dyn NotificationSink,
    device: &str,
) -> Result<(), NotifyError> {
    sink.send_message(test_message(device, Utc::now())).await
}
