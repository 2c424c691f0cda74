//! Multi-consumer event bus.

use crate::event::EnrichedEvent;
use crate::PublishError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Bus that accepts published events.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Bus name.
    fn name(&self) -> &str;

    /// Emit one event.
    async fn put_event(&self, event: EnrichedEvent) -> Result<(), PublishError>;

    /// Attach a subscriber. Events emitted afterwards are delivered to it.
    fn subscribe(&self) -> mpsc::Receiver<Arc<EnrichedEvent>>;

    /// Detach every subscriber. Their receivers drain what is queued and
    /// then end.
    fn close(&self);
}

/// In-process bus fanning each event out to every subscriber.
///
/// Every subscriber has a bounded queue; emission waits while a subscriber's
/// queue is full, so a slow consumer slows the publisher instead of losing
/// events. A subscriber whose queue stays full past the send timeout is
/// detached. Subscribers that hang up are dropped.
pub struct FanoutBus {
    name: String,
    capacity: usize,
    send_timeout: Duration,
    subscribers: RwLock<Vec<mpsc::Sender<Arc<EnrichedEvent>>>>,
}

impl FanoutBus {
    /// Create a bus.
    pub fn new(name: impl Into<String>, capacity: usize, send_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            capacity: capacity.max(1),
            send_timeout,
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().iter().filter(|s| !s.is_closed()).count()
    }
}

#[async_trait]
impl EventBus for FanoutBus {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_event(&self, event: EnrichedEvent) -> Result<(), PublishError> {
        let subscribers = self.subscribers.read().clone();
        let event = Arc::new(event);

        let mut delivered = 0;
        let mut stalled = Vec::new();
        for subscriber in &subscribers {
            match tokio::time::timeout(self.send_timeout, subscriber.send(event.clone())).await {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!(
                        bus = %self.name,
                        event_id = %event.id,
                        timeout_ms = self.send_timeout.as_millis() as u64,
                        "Subscriber stalled, detaching it"
                    );
                    stalled.push(subscriber.clone());
                }
            }
        }

        if delivered < subscribers.len() {
            self.subscribers
                .write()
                .retain(|s| !s.is_closed() && !stalled.iter().any(|x| x.same_channel(s)));
        }

        if delivered == 0 {
            if stalled.is_empty() {
                return Err(PublishError::NoSubscribers(self.name.clone()));
            }
            return Err(PublishError::Stalled {
                bus: self.name.clone(),
                timeout: self.send_timeout,
            });
        }

        debug!(bus = %self.name, event_id = %event.id, delivered, "Event emitted");
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<Arc<EnrichedEvent>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.write().push(tx);
        rx
    }

    fn close(&self) {
        let detached = std::mem::take(&mut *self.subscribers.write()).len();
        debug!(bus = %self.name, detached, "Bus closed");
    }
}
