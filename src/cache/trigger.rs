//! Entry point for collaborators announcing feed events.

use std::sync::Arc;

use uuid::Uuid;

use super::consumer::{ConsumeSummary, EventConsumer};
use super::events::{EventKind, EventQueue};

/// Publishes feed events and optionally consumes them right away.
///
/// ```ignore
/// // After the post row is committed:
/// trigger.post_created(post.id).await;
/// ```
pub struct FeedTrigger {
    queue: Arc<EventQueue>,
    consumer: Arc<EventConsumer>,
    consume_now: bool,
}

impl FeedTrigger {
    /// `consume_now` runs the consumer after every publish; otherwise events
    /// wait for the periodic consume loop.
    pub fn new(queue: Arc<EventQueue>, consumer: Arc<EventConsumer>, consume_now: bool) -> Self {
        Self {
            queue,
            consumer,
            consume_now,
        }
    }

    pub fn consumer(&self) -> &Arc<EventConsumer> {
        &self.consumer
    }

    pub async fn trigger(&self, kind: EventKind) -> Option<ConsumeSummary> {
        self.queue.publish(kind);
        if self.consume_now {
            Some(self.consumer.consume().await)
        } else {
            None
        }
    }

    pub async fn post_created(&self, post_id: Uuid) -> Option<ConsumeSummary> {
        self.trigger(EventKind::PostCreated { post_id }).await
    }

    pub async fn follow_added(&self, follower_id: Uuid, followee_id: Uuid) -> Option<ConsumeSummary> {
        self.trigger(EventKind::FollowAdded {
            follower_id,
            followee_id,
        })
        .await
    }

    pub async fn follow_removed(
        &self,
        follower_id: Uuid,
        followee_id: Uuid,
    ) -> Option<ConsumeSummary> {
        self.trigger(EventKind::FollowRemoved {
            follower_id,
            followee_id,
        })
        .await
    }
}
