//! Event emitter
//!
//! Every accepted mutation produces an [`EventRecord`]. The service persists it
//! first and only then hands it to the emitter, which forwards it to the
//! configured [`EventQueue`]. Without a queue, publishing is a no-op and the
//! persisted log is the only record.

use crate::core::config::{QueueConfig, QueueType};
use crate::core::error::Result;
use crate::core::ids::IdCodec;
use crate::core::types::{EdgeRef, EventRecord, EventSubject, Fields, Method, MicrosClock, EVENT_TYPE};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// Queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// No receiver is attached to the topic anymore
    #[error("Queue topic '{0}' is disconnected")]
    Disconnected(String),

    /// A subscriber's channel is at capacity; the event was not delivered to it
    #[error("Queue topic '{0}' is full")]
    Full(String),

    /// Event could not be encoded
    #[error("Event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Publish collaborator
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Prepare the queue; safe to call repeatedly
    async fn init(&self) -> std::result::Result<(), QueueError>;

    /// Deliver one event
    async fn send_event(&self, event: &EventRecord) -> std::result::Result<(), QueueError>;
}

/// In-process topic backed by `flume` channels
///
/// Every subscriber gets its own channel and receives each event as a JSON
/// value, the same payload an external broker would carry. Publishing never
/// waits: an event sent while nobody is subscribed is dropped, and a full
/// subscriber channel is reported as [`QueueError::Full`].
pub struct ChannelQueue {
    topic: String,
    capacity: usize,
    subscribers: Mutex<Vec<flume::Sender<serde_json::Value>>>,
}

impl ChannelQueue {
    /// Create a topic; `capacity` bounds each subscriber channel, `0` means unbounded
    pub fn new(topic: impl Into<String>, capacity: usize) -> Self {
        Self {
            topic: topic.into(),
            capacity,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Topic name
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Attach a new receiver; it sees events published from now on
    pub fn subscribe(&self) -> flume::Receiver<serde_json::Value> {
        let (sender, receiver) = if self.capacity == 0 {
            flume::unbounded()
        } else {
            flume::bounded(self.capacity)
        };
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().iter().filter(|s| !s.is_disconnected()).count()
    }
}

#[async_trait]
impl EventQueue for ChannelQueue {
    async fn init(&self) -> std::result::Result<(), QueueError> {
        tracing::info!(topic = %self.topic, capacity = self.capacity, "Channel queue ready");
        Ok(())
    }

    async fn send_event(&self, event: &EventRecord) -> std::result::Result<(), QueueError> {
        let payload = serde_json::to_value(event)?;

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| !s.is_disconnected());
        if subscribers.is_empty() {
            tracing::debug!(topic = %self.topic, event_id = %event.id, "No subscribers, event not delivered");
            return Ok(());
        }

        let mut full = false;
        for subscriber in subscribers.iter() {
            match subscriber.try_send(payload.clone()) {
                Ok(()) => {}
                Err(flume::TrySendError::Full(_)) => full = true,
                // Dropped between retain and send; pruned on the next event
                Err(flume::TrySendError::Disconnected(_)) => {}
            }
        }

        if full {
            return Err(QueueError::Full(self.topic.clone()));
        }
        Ok(())
    }
}

/// Create the configured queue, if any
pub fn create_queue(config: &QueueConfig) -> Option<Arc<ChannelQueue>> {
    match config.queue_type {
        QueueType::None => None,
        QueueType::Channel => Some(Arc::new(ChannelQueue::new(config.topic.clone(), config.capacity))),
    }
}

/// Builds events and forwards them to the optional queue
#[derive(Clone, Default)]
pub struct EventEmitter {
    queue: Option<Arc<dyn EventQueue>>,
    clock: Arc<MicrosClock>,
}

impl EventEmitter {
    /// Emitter that only builds events
    pub fn new() -> Self {
        Self::default()
    }

    /// Emitter publishing to `queue`
    pub fn with_queue(queue: Arc<dyn EventQueue>) -> Self {
        Self {
            queue: Some(queue),
            clock: Arc::new(MicrosClock::new()),
        }
    }

    /// Whether a queue is attached
    pub fn has_queue(&self) -> bool {
        self.queue.is_some()
    }

    /// Initialise the attached queue
    pub async fn init(&self) -> std::result::Result<(), QueueError> {
        match &self.queue {
            Some(queue) => queue.init().await,
            None => Ok(()),
        }
    }

    /// Publish an already persisted event; no-op without a queue
    pub async fn send_event(&self, event: &EventRecord) -> std::result::Result<(), QueueError> {
        match &self.queue {
            Some(queue) => queue.send_event(event).await,
            None => Ok(()),
        }
    }

    /// Event for an object mutation
    pub fn object_event(
        &self,
        codec: &IdCodec,
        method: Method,
        current: Option<Fields>,
        previous: Option<Fields>,
        user: Option<&str>,
    ) -> Result<EventRecord> {
        let object_id = current
            .as_ref()
            .or(previous.as_ref())
            .and_then(|doc| doc.get("id"))
            .and_then(|id| id.as_str())
            .unwrap_or_default()
            .to_string();
        self.build(codec, method, EventSubject::Object(object_id), current, previous, user)
    }

    /// Event for an edge mutation
    pub fn edge_event(&self, codec: &IdCodec, method: Method, edge: EdgeRef, user: Option<&str>) -> Result<EventRecord> {
        self.build(codec, method, EventSubject::Edge(edge), None, None, user)
    }

    fn build(
        &self,
        codec: &IdCodec,
        method: Method,
        subject: EventSubject,
        current: Option<Fields>,
        previous: Option<Fields>,
        user: Option<&str>,
    ) -> Result<EventRecord> {
        Ok(EventRecord {
            id: codec.generate(EVENT_TYPE)?,
            object_type: EVENT_TYPE.to_string(),
            method,
            subject,
            current,
            previous,
            created_at: self.clock.now(),
            user: user.map(str::to_string),
        })
    }
}
