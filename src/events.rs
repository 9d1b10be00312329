//! Notification bus for offline status changes
//!
//! Observers (UI layers, the CLI progress display) subscribe to the bus and
//! re-query the offline library when an item they show changes state.

use tokio::sync::broadcast;
use tracing::trace;

/// Default number of buffered events per subscriber
const DEFAULT_CAPACITY: usize = 256;

/// Event posted on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfflineEvent {
    /// The offline status of a track or album changed
    DownloadStatusChanged { id: String },
}

impl OfflineEvent {
    /// Id of the item the event is about
    pub fn subject(&self) -> &str {
        match self {
            Self::DownloadStatusChanged { id } => id,
        }
    }
}

/// Fire-and-forget broadcast bus
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OfflineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Post a status-changed event for `id`
    ///
    /// Having no subscribers is not an error.
    pub fn post_status_changed(&self, id: &str) {
        trace!("Posting status change for {}", id);
        let _ = self.sender.send(OfflineEvent::DownloadStatusChanged { id: id.to_string() });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OfflineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_without_subscribers() {
        let bus = EventBus::default();
        bus.post_status_changed("track-1");
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.post_status_changed("album-7");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.subject(), "album-7");
    }
}
