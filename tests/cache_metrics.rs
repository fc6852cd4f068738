mod support;

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use fanfeed::application::feed::FeedQuery;
use fanfeed::application::repos::RepoError;
use fanfeed::cache::{
    BoundedListCache, CacheConfig, CacheError, CachedFeedItem, ListKey, ListSource, ListStore,
    Stamp,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serial_test::serial;
use support::{EPOCH, Harness, HarnessOptions};
use uuid::Uuid;

fn snapshotter() -> &'static Snapshotter {
    static SNAPSHOTTER: OnceLock<Snapshotter> = OnceLock::new();
    SNAPSHOTTER.get_or_init(|| {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        recorder
            .install()
            .expect("debug metrics recorder should install in this test process");
        snapshotter
    })
}

fn counter(name: &str, label: Option<(&str, &str)>) -> u64 {
    snapshotter()
        .snapshot()
        .into_vec()
        .into_iter()
        .filter(|(composite_key, _, _, _)| {
            let key = composite_key.key();
            key.name() == name
                && label.is_none_or(|(k, v)| {
                    key.labels()
                        .any(|label| label.key() == k && label.value() == v)
                })
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(count) => count,
            _ => 0,
        })
        .sum()
}

struct BrokenStore;

#[async_trait]
impl ListStore for BrokenStore {
    async fn push_and_trim(&self, _: &str, _: String, _: usize) -> Result<bool, CacheError> {
        Err(CacheError::Backend("connection refused".into()))
    }

    async fn range(&self, _: &str) -> Result<Option<Vec<String>>, CacheError> {
        Err(CacheError::Backend("connection refused".into()))
    }

    async fn stamp(&self, _: &str) -> Result<Stamp, CacheError> {
        Err(CacheError::Backend("connection refused".into()))
    }

    async fn fill(&self, _: &str, _: Vec<String>, _: Stamp) -> Result<bool, CacheError> {
        Err(CacheError::Backend("connection refused".into()))
    }

    async fn delete(&self, _: &str) -> Result<(), CacheError> {
        Err(CacheError::Backend("connection refused".into()))
    }
}

#[tokio::test]
#[serial]
async fn cache_lookups_count_hits_and_misses() {
    snapshotter();
    let hits = counter("fanfeed_cache_hit_total", None);
    let misses = counter("fanfeed_cache_miss_total", None);
    let cold = counter("fanfeed_cache_push_total", Some(("result", "cold")));
    let applied = counter("fanfeed_cache_push_total", Some(("result", "applied")));

    let harness = Harness::new(5);
    let author = Uuid::new_v4();
    let reader = Uuid::new_v4();
    harness.store.follow(reader, author);
    harness.publish(author, 0).await;

    for _ in 0..2 {
        harness
            .feed
            .get_feed_page(reader, FeedQuery::latest())
            .await
            .expect("feed page");
    }
    harness.publish(author, 1).await;

    assert_eq!(counter("fanfeed_cache_miss_total", None) - misses, 1);
    assert_eq!(counter("fanfeed_cache_hit_total", None) - hits, 1);
    // Author and reader are both cold for the first post, only the reader is
    // warm for the second.
    assert_eq!(
        counter("fanfeed_cache_push_total", Some(("result", "cold"))) - cold,
        3
    );
    assert_eq!(
        counter("fanfeed_cache_push_total", Some(("result", "applied"))) - applied,
        1
    );
}

#[tokio::test]
#[serial]
async fn unavailable_backend_reads_through_and_counts_errors() {
    snapshotter();
    let stamp_errors = counter("fanfeed_cache_error_total", Some(("op", "stamp")));
    let push_errors = counter("fanfeed_cache_error_total", Some(("op", "push")));
    let delete_errors = counter("fanfeed_cache_error_total", Some(("op", "delete")));

    let cache = BoundedListCache::new(Arc::new(BrokenStore), &CacheConfig::default());
    let key = ListKey::newsfeed(Uuid::new_v4());
    let post = Harness::new(5).store.add_post(Uuid::new_v4(), 0);
    let entry =
        fanfeed::domain::entities::NewsfeedEntryRecord::for_recipient(Uuid::new_v4(), &post);

    let list = cache
        .load(&key, |_| async move { Ok::<_, RepoError>(vec![entry]) })
        .await
        .expect("fallback result");
    assert_eq!(list.source, ListSource::Bypassed);
    assert_eq!(list.items.len(), 1);
    assert_eq!(list.items[0].created_at, EPOCH);

    cache.push(&key, &CachedFeedItem::from(&entry)).await;

    assert_eq!(
        counter("fanfeed_cache_error_total", Some(("op", "stamp"))) - stamp_errors,
        1
    );
    assert_eq!(
        counter("fanfeed_cache_error_total", Some(("op", "push"))) - push_errors,
        1
    );
    assert_eq!(
        counter("fanfeed_cache_error_total", Some(("op", "delete"))) - delete_errors,
        1
    );
}

#[tokio::test]
#[serial]
async fn store_fallbacks_are_labelled_by_reason() {
    snapshotter();
    let disabled = counter(
        "fanfeed_feed_store_fallback_total",
        Some(("reason", "disabled")),
    );
    let horizon = counter(
        "fanfeed_feed_store_fallback_total",
        Some(("reason", "horizon")),
    );

    let uncached = Harness::with_options(HarnessOptions {
        cache_enabled: false,
        ..Default::default()
    });
    uncached
        .feed
        .get_feed_page(Uuid::new_v4(), FeedQuery::latest())
        .await
        .expect("feed page");

    let cached = Harness::new(2);
    let author = Uuid::new_v4();
    let reader = Uuid::new_v4();
    cached.store.follow(reader, author);
    for minute in 0..3 {
        cached.publish(author, minute).await;
    }
    let page = cached
        .feed
        .get_feed_page(reader, FeedQuery::latest().with_page_size(5))
        .await
        .expect("feed page");
    assert_eq!(page.items.len(), 3);

    assert_eq!(
        counter(
            "fanfeed_feed_store_fallback_total",
            Some(("reason", "disabled"))
        ) - disabled,
        1
    );
    assert_eq!(
        counter(
            "fanfeed_feed_store_fallback_total",
            Some(("reason", "horizon"))
        ) - horizon,
        1
    );
}

#[tokio::test]
#[serial]
async fn fanout_counts_recipients_and_batches() {
    snapshotter();
    let recipients = counter("fanfeed_fanout_recipients_total", None);
    let inline_batches = counter("fanfeed_fanout_batches_total", Some(("mode", "inline")));

    let harness = Harness::new(5);
    let author = Uuid::new_v4();
    for _ in 0..3 {
        harness.store.follow(Uuid::new_v4(), author);
    }
    harness.publish(author, 0).await;

    assert_eq!(counter("fanfeed_fanout_recipients_total", None) - recipients, 4);
    assert_eq!(
        counter("fanfeed_fanout_batches_total", Some(("mode", "inline"))) - inline_batches,
        2
    );
}
