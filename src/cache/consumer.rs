//! Drains feed events and applies them.

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use tracing::{info, instrument, warn};

use crate::application::fanout::FanoutService;

use super::events::{EventKind, EventQueue, FeedEvent};
use super::keys::ListKey;
use super::list::BoundedListCache;

const METRIC_EVENT_CONSUME_MS: &str = "fanfeed_event_consume_ms";

#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    /// Events drained per `consume` call.
    pub batch_limit: usize,
    /// Attempts before a failing event is dropped.
    pub max_attempts: u32,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            batch_limit: 100,
            max_attempts: 3,
        }
    }
}

impl From<&crate::config::EventSettings> for ConsumerSettings {
    fn from(settings: &crate::config::EventSettings) -> Self {
        Self {
            batch_limit: settings.consume_batch_limit.get() as usize,
            max_attempts: settings.max_attempts.get(),
        }
    }
}

/// Counts of what one `consume` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeSummary {
    pub processed: usize,
    pub fanned_out: usize,
    pub invalidated: usize,
    pub requeued: usize,
    pub dropped: usize,
}

pub struct EventConsumer {
    queue: Arc<EventQueue>,
    fanout: Arc<FanoutService>,
    cache: Arc<BoundedListCache>,
    settings: ConsumerSettings,
}

impl EventConsumer {
    pub fn new(
        queue: Arc<EventQueue>,
        fanout: Arc<FanoutService>,
        cache: Arc<BoundedListCache>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            queue,
            fanout,
            cache,
            settings,
        }
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Process up to `batch_limit` pending events.
    #[instrument(skip(self))]
    pub async fn consume(&self) -> ConsumeSummary {
        let started_at = Instant::now();
        let events = self.queue.drain(self.settings.batch_limit.max(1));
        let mut summary = ConsumeSummary::default();
        if events.is_empty() {
            return summary;
        }

        for event in events {
            summary.processed += 1;
            self.apply(event, &mut summary).await;
        }

        info!(
            processed = summary.processed,
            fanned_out = summary.fanned_out,
            invalidated = summary.invalidated,
            requeued = summary.requeued,
            dropped = summary.dropped,
            "Feed events consumed"
        );
        histogram!(METRIC_EVENT_CONSUME_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        summary
    }

    async fn apply(&self, mut event: FeedEvent, summary: &mut ConsumeSummary) {
        match event.kind.clone() {
            EventKind::PostCreated { post_id } => match self.fanout.fanout_post(post_id).await {
                Ok(_) => summary.fanned_out += 1,
                Err(err) => {
                    event.attempts += 1;
                    if event.attempts < self.settings.max_attempts {
                        warn!(
                            event_id = %event.id,
                            %post_id,
                            attempts = event.attempts,
                            error = %err,
                            "Fanout failed; event requeued"
                        );
                        self.queue.requeue(event);
                        summary.requeued += 1;
                    } else {
                        warn!(
                            event_id = %event.id,
                            %post_id,
                            attempts = event.attempts,
                            error = %err,
                            "Fanout failed; event dropped"
                        );
                        summary.dropped += 1;
                    }
                }
            },
            // The follower's cached list no longer matches what a fresh
            // fan-out would produce for them.
            EventKind::FollowAdded { follower_id, .. }
            | EventKind::FollowRemoved { follower_id, .. } => {
                self.cache.invalidate(&ListKey::newsfeed(follower_id)).await;
                summary.invalidated += 1;
            }
        }
    }
}
