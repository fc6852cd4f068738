mod support;

use std::sync::Arc;

use fanfeed::application::fanout::{DispatchMode, FanoutError};
use fanfeed::application::feed::FeedQuery;
use fanfeed::cache::{ConsumerSettings, EventConsumer, EventKind, EventQueue, FeedTrigger};
use support::{Harness, HarnessOptions};
use uuid::Uuid;

fn consumer_for(harness: &Harness, max_attempts: u32) -> (Arc<EventQueue>, Arc<EventConsumer>) {
    let queue = Arc::new(EventQueue::new());
    let consumer = Arc::new(EventConsumer::new(
        queue.clone(),
        harness.fanout.clone(),
        harness.cache.clone(),
        ConsumerSettings {
            batch_limit: 16,
            max_attempts,
        },
    ));
    (queue, consumer)
}

#[tokio::test]
async fn batch_count_follows_audience_size() {
    let harness = Harness::new(5);
    let author = Uuid::new_v4();

    let solo = harness.store.add_post(author, 0);
    let report = harness.fanout.fanout(&solo).await.expect("fanout");
    assert_eq!((report.recipients, report.batches), (1, 1));

    harness.store.follow(Uuid::new_v4(), author);
    harness.store.follow(Uuid::new_v4(), author);
    let three = harness.store.add_post(author, 1);
    let report = harness.fanout.fanout(&three).await.expect("fanout");
    assert_eq!((report.recipients, report.batches), (3, 1));

    harness.store.follow(Uuid::new_v4(), author);
    let four = harness.store.add_post(author, 2);
    let report = harness.fanout.fanout(&four).await.expect("fanout");
    assert_eq!((report.recipients, report.batches), (4, 2));
    assert_eq!(
        report.to_string(),
        "4 newsfeeds are going to fanout, 2 batches created."
    );
    assert_eq!(harness.store.entries_for_post(four.id), 4);
}

#[tokio::test]
async fn author_and_each_follower_receive_exactly_one_entry() {
    let harness = Harness::new(5);
    let author = Uuid::new_v4();
    let follower = Uuid::new_v4();
    harness.store.follow(follower, author);
    harness.store.follow(follower, author);
    harness.store.follow(author, author);

    let post = harness.publish(author, 0).await;

    assert_eq!(harness.store.entries_for_post(post.id), 2);
    assert_eq!(harness.store.feed_of(author).len(), 1);
    assert_eq!(harness.store.feed_of(follower).len(), 1);
}

#[tokio::test]
async fn repeated_fanout_is_idempotent() {
    let harness = Harness::new(5);
    let author = Uuid::new_v4();
    let follower = Uuid::new_v4();
    harness.store.follow(follower, author);

    let post = harness.publish(author, 0).await;
    let first = harness.store.feed_of(follower);

    // Warm the follower's list so a second delivery hits a cached key.
    let page = harness
        .feed
        .get_feed_page(follower, FeedQuery::latest())
        .await
        .expect("feed page");
    assert_eq!(page.items.len(), 1);

    harness.fanout.fanout(&post).await.expect("second fanout");

    assert_eq!(harness.store.feed_of(follower), first);
    let page = harness
        .feed
        .get_feed_page(follower, FeedQuery::latest())
        .await
        .expect("feed page");
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].post_id, post.id);
}

#[tokio::test]
async fn queued_batches_land_once_workers_run() {
    let harness = Harness::with_options(HarnessOptions {
        queued: true,
        ..Default::default()
    });
    let author = Uuid::new_v4();
    for _ in 0..3 {
        harness.store.follow(Uuid::new_v4(), author);
    }

    let post = harness.store.add_post(author, 0);
    let report = harness.fanout.fanout(&post).await.expect("fanout");

    assert_eq!(report.mode, DispatchMode::Queued);
    assert_eq!(report.job_ids.len(), 2);
    assert_eq!(harness.store.entries_for_post(post.id), 0);

    let ran = harness.store.run_pending_jobs(&harness.executor).await;
    assert_eq!(ran, 2);
    assert_eq!(harness.store.entries_for_post(post.id), 4);
    assert!(harness.store.pending_jobs().is_empty());
}

#[tokio::test]
async fn redelivered_batch_does_not_duplicate_entries() {
    let harness = Harness::with_options(HarnessOptions {
        queued: true,
        ..Default::default()
    });
    let author = Uuid::new_v4();
    harness.store.follow(Uuid::new_v4(), author);

    let post = harness.store.add_post(author, 0);
    harness.fanout.fanout(&post).await.expect("fanout");
    let job = harness.store.pending_jobs().remove(0);
    let payload = serde_json::from_value(job.payload).expect("payload");

    let first = harness.executor.execute(&payload).await.expect("first run");
    let second = harness.executor.execute(&payload).await.expect("second run");

    assert_eq!((first.inserted, first.already_present), (2, 0));
    assert_eq!((second.inserted, second.already_present), (0, 2));
    assert_eq!(harness.store.entries_for_post(post.id), 2);
}

#[tokio::test]
async fn small_audiences_skip_the_queue() {
    let harness = Harness::with_options(HarnessOptions {
        queued: true,
        inline_threshold: 10,
        ..Default::default()
    });
    let author = Uuid::new_v4();
    harness.store.follow(Uuid::new_v4(), author);

    let post = harness.store.add_post(author, 0);
    let report = harness.fanout.fanout(&post).await.expect("fanout");

    assert_eq!(report.mode, DispatchMode::Inline);
    assert!(report.job_ids.is_empty());
    assert!(harness.store.pending_jobs().is_empty());
    assert_eq!(harness.store.entries_for_post(post.id), 2);
}

#[tokio::test]
async fn audience_failure_aborts_the_attempt() {
    let harness = Harness::new(5);
    let author = Uuid::new_v4();
    harness.store.follow(Uuid::new_v4(), author);
    harness.store.fail_followers(true);

    let post = harness.store.add_post(author, 0);
    let err = harness.fanout.fanout(&post).await.expect_err("audience fails");

    assert!(matches!(err, FanoutError::Audience(_)));
    assert_eq!(harness.store.entries_for_post(post.id), 0);
}

#[tokio::test]
async fn unknown_post_is_reported() {
    let harness = Harness::new(5);
    let missing = Uuid::new_v4();

    let err = harness
        .fanout
        .fanout_post(missing)
        .await
        .expect_err("post is missing");

    assert!(matches!(err, FanoutError::PostNotFound(id) if id == missing));
}

#[tokio::test]
async fn post_created_event_runs_fanout() {
    let harness = Harness::new(5);
    let author = Uuid::new_v4();
    let follower = Uuid::new_v4();
    harness.store.follow(follower, author);
    let post = harness.store.add_post(author, 0);

    let (queue, consumer) = consumer_for(&harness, 3);
    let trigger = FeedTrigger::new(queue.clone(), consumer, true);

    let summary = trigger.post_created(post.id).await.expect("consumed now");

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.fanned_out, 1);
    assert!(queue.is_empty());
    assert_eq!(harness.store.feed_of(follower).len(), 1);
}

#[tokio::test]
async fn failed_post_event_is_retried_then_dropped() {
    let harness = Harness::new(5);
    let (queue, consumer) = consumer_for(&harness, 2);

    queue.publish(EventKind::PostCreated {
        post_id: Uuid::new_v4(),
    });

    let first = consumer.consume().await;
    assert_eq!((first.requeued, first.dropped), (1, 0));
    assert_eq!(queue.len(), 1);

    let second = consumer.consume().await;
    assert_eq!((second.requeued, second.dropped), (0, 1));
    assert!(queue.is_empty());

    assert_eq!(consumer.consume().await.processed, 0);
}

#[tokio::test]
async fn follow_change_drops_the_followers_cached_feed() {
    let harness = Harness::new(5);
    let author = Uuid::new_v4();
    let follower = Uuid::new_v4();
    harness.store.follow(follower, author);
    harness.publish(author, 0).await;

    let warm = harness
        .feed
        .get_feed_page(follower, FeedQuery::latest())
        .await
        .expect("feed page");
    assert_eq!(warm.items.len(), 1);

    // A backfilled entry written behind the cache's back stays invisible
    // until the follow event invalidates the list.
    let other = harness.store.add_post(Uuid::new_v4(), 5);
    harness.store.insert_raw(follower, &other);
    let stale = harness
        .feed
        .get_feed_page(follower, FeedQuery::latest())
        .await
        .expect("feed page");
    assert_eq!(stale.items.len(), 1);

    let (queue, consumer) = consumer_for(&harness, 3);
    let trigger = FeedTrigger::new(queue, consumer, true);
    let summary = trigger
        .follow_added(follower, other.author_id)
        .await
        .expect("consumed now");
    assert_eq!(summary.invalidated, 1);

    let fresh = harness
        .feed
        .get_feed_page(follower, FeedQuery::latest())
        .await
        .expect("feed page");
    assert_eq!(fresh.items.len(), 2);
    assert_eq!(fresh.items[0].post_id, other.id);
}
