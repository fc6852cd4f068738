//! In-memory collaborators for driving fan-out and feed reads without Postgres.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fanfeed::application::fanout::{
    BatchDispatcher, BatchExecutor, FanoutBatchJobPayload, FanoutService, FanoutSettings,
    InlineDispatcher, QueuedDispatcher,
};
use fanfeed::application::feed::{FeedService, FeedSettings};
use fanfeed::application::pagination::{FeedCursor, PageRequest};
use fanfeed::application::repos::{
    FriendshipsRepo, InsertOutcome, JobsRepo, NewJobRecord, NewsfeedRepo, PostsRepo, RepoError,
};
use fanfeed::cache::{BoundedListCache, CacheConfig};
use fanfeed::domain::entities::{FollowEdge, JobRecord, NewsfeedEntryRecord, PostRecord};
use fanfeed::domain::types::JobState;
use time::{Duration, OffsetDateTime, macros::datetime};
use uuid::Uuid;

pub const EPOCH: OffsetDateTime = datetime!(2024-05-01 12:00:00 UTC);

/// Post, follow graph, newsfeed and job tables held in memory.
#[derive(Default)]
pub struct InMemoryStore {
    posts: Mutex<HashMap<Uuid, PostRecord>>,
    follows: Mutex<Vec<FollowEdge>>,
    newsfeeds: Mutex<Vec<NewsfeedEntryRecord>>,
    jobs: Mutex<Vec<JobRecord>>,
    fail_followers: AtomicBool,
    list_calls: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store a post by `author_id`, `minutes` after [`EPOCH`].
    pub fn add_post(&self, author_id: Uuid, minutes: i64) -> PostRecord {
        let post = PostRecord {
            id: Uuid::new_v4(),
            author_id,
            content: format!("post at +{minutes}m"),
            created_at: EPOCH + Duration::minutes(minutes),
        };
        self.posts
            .lock()
            .unwrap()
            .insert(post.id, post.clone());
        post
    }

    pub fn follow(&self, follower_id: Uuid, followee_id: Uuid) {
        self.follows.lock().unwrap().push(FollowEdge {
            from_user_id: follower_id,
            to_user_id: followee_id,
            created_at: OffsetDateTime::now_utc(),
        });
    }

    pub fn fail_followers(&self, fail: bool) {
        self.fail_followers.store(fail, Ordering::SeqCst);
    }

    /// Write an entry directly, bypassing fan-out and the cache.
    pub fn insert_raw(&self, user_id: Uuid, post: &PostRecord) -> NewsfeedEntryRecord {
        let entry = NewsfeedEntryRecord::for_recipient(user_id, post);
        self.newsfeeds.lock().unwrap().push(entry);
        entry
    }

    /// Every stored entry of `user_id`, newest first.
    pub fn feed_of(&self, user_id: Uuid) -> Vec<NewsfeedEntryRecord> {
        let mut entries: Vec<_> = self
            .newsfeeds
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .copied()
            .collect();
        entries.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
        entries
    }

    pub fn entries_for_post(&self, post_id: Uuid) -> usize {
        self.newsfeeds
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.post_id == post_id)
            .count()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn pending_jobs(&self) -> Vec<JobRecord> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|job| job.state == JobState::Pending)
            .cloned()
            .collect()
    }

    /// Run every pending job through `executor`, as a worker would.
    pub async fn run_pending_jobs(&self, executor: &BatchExecutor) -> usize {
        let pending = self.pending_jobs();
        for job in &pending {
            let payload: FanoutBatchJobPayload =
                serde_json::from_value(job.payload.clone()).expect("fanout payload");
            executor.execute(&payload).await.expect("batch executes");
            self.mark_done(&job.id);
        }
        pending.len()
    }

    fn mark_done(&self, id: &str) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|job| job.id == id) {
            job.state = JobState::Done;
            job.attempts += 1;
            job.done_at = Some(OffsetDateTime::now_utc());
        }
    }
}

#[async_trait]
impl NewsfeedRepo for InMemoryStore {
    async fn insert_entries(
        &self,
        entries: &[NewsfeedEntryRecord],
    ) -> Result<InsertOutcome, RepoError> {
        let mut rows = self.newsfeeds.lock().unwrap();
        let mut outcome = InsertOutcome::default();
        for entry in entries {
            let exists = rows
                .iter()
                .any(|row| row.user_id == entry.user_id && row.post_id == entry.post_id);
            if exists {
                outcome.already_present.push(entry.user_id);
            } else {
                rows.push(*entry);
                outcome.inserted.push(*entry);
            }
        }
        Ok(outcome)
    }

    async fn list_entries(
        &self,
        user_id: Uuid,
        page: PageRequest<FeedCursor>,
    ) -> Result<Vec<NewsfeedEntryRecord>, RepoError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let bound = page.cursor.map(|cursor| cursor.sort_key());
        Ok(self
            .feed_of(user_id)
            .into_iter()
            .filter(|entry| bound.is_none_or(|bound| entry.sort_key() < bound))
            .take(page.limit as usize)
            .collect())
    }

    async fn list_entries_after(
        &self,
        user_id: Uuid,
        after: FeedCursor,
        limit: u32,
    ) -> Result<Vec<NewsfeedEntryRecord>, RepoError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let bound = after.sort_key();
        let mut newer: Vec<_> = self
            .feed_of(user_id)
            .into_iter()
            .filter(|entry| entry.sort_key() > bound)
            .collect();
        newer.reverse();
        newer.truncate(limit as usize);
        newer.reverse();
        Ok(newer)
    }
}

#[async_trait]
impl FriendshipsRepo for InMemoryStore {
    async fn followers(&self, user_id: Uuid) -> Result<Vec<Uuid>, RepoError> {
        if self.fail_followers.load(Ordering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        Ok(self
            .follows
            .lock()
            .unwrap()
            .iter()
            .filter(|edge| edge.to_user_id == user_id)
            .map(|edge| edge.from_user_id)
            .collect())
    }
}

#[async_trait]
impl PostsRepo for InMemoryStore {
    async fn find_post(&self, id: Uuid) -> Result<Option<PostRecord>, RepoError> {
        Ok(self.posts.lock().unwrap().get(&id).cloned())
    }
}

#[async_trait]
impl JobsRepo for InMemoryStore {
    async fn enqueue_job(&self, job: NewJobRecord) -> Result<String, RepoError> {
        let mut jobs = self.jobs.lock().unwrap();
        let id = format!("job-{}", jobs.len() + 1);
        jobs.push(JobRecord {
            id: id.clone(),
            job_type: job.job_type,
            payload: job.payload,
            state: JobState::Pending,
            attempts: 0,
            max_attempts: job.max_attempts,
            run_at: job.run_at,
            done_at: None,
            last_error: None,
            priority: job.priority,
        });
        Ok(id)
    }

    async fn find_job(&self, id: &str) -> Result<Option<JobRecord>, RepoError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .find(|job| job.id == id)
            .cloned())
    }
}

/// Services wired over one [`InMemoryStore`].
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub cache: Arc<BoundedListCache>,
    pub executor: Arc<BatchExecutor>,
    pub fanout: Arc<FanoutService>,
    pub feed: FeedService,
}

pub struct HarnessOptions {
    pub horizon: usize,
    pub cache_enabled: bool,
    pub batch_size: usize,
    pub inline_threshold: usize,
    pub queued: bool,
    pub feed: FeedSettings,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            horizon: 5,
            cache_enabled: true,
            batch_size: 3,
            inline_threshold: 0,
            queued: false,
            feed: FeedSettings::default(),
        }
    }
}

impl Harness {
    pub fn new(horizon: usize) -> Self {
        Self::with_options(HarnessOptions {
            horizon,
            ..Default::default()
        })
    }

    pub fn with_options(options: HarnessOptions) -> Self {
        let store = InMemoryStore::new();
        let config = CacheConfig {
            enabled: options.cache_enabled,
            horizon: options.horizon,
            ..Default::default()
        };
        let cache = Arc::new(if options.cache_enabled {
            BoundedListCache::in_memory(&config)
        } else {
            BoundedListCache::disabled(options.horizon)
        });

        let executor = Arc::new(BatchExecutor::new(store.clone(), cache.clone()));
        let dispatcher: Arc<dyn BatchDispatcher> = if options.queued {
            Arc::new(QueuedDispatcher::new(store.clone(), 5))
        } else {
            Arc::new(InlineDispatcher::new(executor.clone()))
        };
        let fanout = Arc::new(FanoutService::new(
            store.clone(),
            store.clone(),
            executor.clone(),
            dispatcher,
            FanoutSettings {
                batch_size: options.batch_size,
                inline_threshold: options.inline_threshold,
            },
        ));
        let feed = FeedService::new(store.clone(), cache.clone(), options.feed);

        Self {
            store,
            cache,
            executor,
            fanout,
            feed,
        }
    }

    /// Store a post and fan it out.
    pub async fn publish(&self, author_id: Uuid, minutes: i64) -> PostRecord {
        let post = self.store.add_post(author_id, minutes);
        self.fanout.fanout(&post).await.expect("fanout succeeds");
        post
    }
}
