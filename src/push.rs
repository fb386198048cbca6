//! Live fan-out of decoded readings to dashboard subscribers.

use crate::reading::Reading;
use tokio::sync::broadcast;
use tracing::trace;

/// Broadcast channel carrying every decoded reading to live subscribers.
///
/// Publishing never blocks and never fails; a subscriber that falls more than
/// `capacity` readings behind skips ahead (see [`broadcast::error::RecvError::Lagged`]).
///
/// # Example
/// ```
/// use myco2_listener::push::LivePush;
///
/// let push = LivePush::new(16);
/// let _dashboard = push.subscribe();
/// ```
#[derive(Debug, Clone)]
pub struct LivePush {
    tx: broadcast::Sender<Reading>,
}

impl LivePush {
    /// Create a channel buffering up to `capacity` readings per subscriber.
    ///
    /// # Arguments
    /// * `capacity` - Buffered readings per subscriber, at least 1
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Reading> {
        self.tx.subscribe()
    }

    /// Send `reading` to current subscribers. Returns how many received it;
    /// having none is normal.
    pub fn publish(&self, reading: &Reading) -> usize {
        match self.tx.send(reading.clone()) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("No live subscribers");
                0
            }
        }
    }
}
