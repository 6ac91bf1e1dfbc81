use crate::constants::defaults::EVENT_CHANNEL_CAPACITY;
use serde_json::Value;
use tokio::sync::broadcast;

/// Broadcast publisher for domain lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub domain: String,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event for one domain; returns the number of receivers reached
    pub fn publish(&self, event_name: &str, domain: &str, context: Value) -> usize {
        let event = PublishedEvent {
            name: event_name.to_string(),
            domain: domain.to_string(),
            context,
            published_at: chrono::Utc::now(),
        };

        // send() only fails when there are no subscribers, which is fine here
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}
