//! Feed events.
//!
//! Writers outside this crate announce new posts and follow-graph changes as
//! explicit messages; the consumer turns them into fan-out and cache
//! invalidation.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::gauge;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";
const METRIC_EVENT_QUEUE_LEN: &str = "fanfeed_event_queue_len";

/// Monotonic epoch for ordering events within this process.
pub type Epoch = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A post was created and must reach its audience.
    PostCreated { post_id: Uuid },
    /// `follower_id` started following `followee_id`.
    FollowAdded { follower_id: Uuid, followee_id: Uuid },
    /// `follower_id` stopped following `followee_id`.
    FollowRemoved { follower_id: Uuid, followee_id: Uuid },
}

#[derive(Debug, Clone)]
pub struct FeedEvent {
    /// Unique identifier for idempotency (UUIDv4).
    pub id: Uuid,
    pub epoch: Epoch,
    pub kind: EventKind,
    pub timestamp: OffsetDateTime,
    /// Processing attempts already made.
    pub attempts: u32,
}

impl FeedEvent {
    pub fn new(kind: EventKind, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            kind,
            timestamp: OffsetDateTime::now_utc(),
            attempts: 0,
        }
    }
}

/// In-memory FIFO of pending feed events.
pub struct EventQueue {
    queue: Mutex<VecDeque<FeedEvent>>,
    epoch_counter: AtomicU64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Publish a new event and return it.
    pub fn publish(&self, kind: EventKind) -> FeedEvent {
        let event = FeedEvent::new(kind, self.next_epoch());

        info!(
            event_id = %event.id,
            event_epoch = event.epoch,
            event_kind = ?event.kind,
            "Feed event enqueued"
        );

        let mut queue = mutex_lock(&self.queue, SOURCE, "publish");
        queue.push_back(event.clone());
        gauge!(METRIC_EVENT_QUEUE_LEN).set(queue.len() as f64);
        event
    }

    /// Put back an event whose processing failed, keeping its identity.
    pub fn requeue(&self, event: FeedEvent) {
        let mut queue = mutex_lock(&self.queue, SOURCE, "requeue");
        queue.push_back(event);
        gauge!(METRIC_EVENT_QUEUE_LEN).set(queue.len() as f64);
    }

    /// Drain up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<FeedEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let events = queue.drain(..count).collect();
        gauge!(METRIC_EVENT_QUEUE_LEN).set(queue.len() as f64);
        events
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
