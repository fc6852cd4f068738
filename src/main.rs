use std::{process, sync::Arc, time::Duration};

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_sql::{Config as ApalisSqlConfig, postgres::PostgresStorage};
use fanfeed::{
    application::{
        error::{AppError, ErrorReport},
        fanout::{
            BatchDispatcher, BatchExecutor, FanoutBatchJobPayload, FanoutError, FanoutService,
            FanoutSettings, JobWorkerContext, QueuedDispatcher, process_fanout_batch_job,
            wait_for_job_completion,
        },
        feed::{FeedError, FeedQuery, FeedService, FeedSettings},
        pagination::FeedCursor,
        repos::{FriendshipsRepo, JobsRepo, NewsfeedRepo, PostsRepo},
    },
    cache::{
        BoundedListCache, CacheBackend, CacheConfig, ConsumerSettings, EventConsumer, EventQueue,
        FeedTrigger, ListKey,
    },
    config,
    domain::types::JobType,
    infra::{db::PostgresRepositories, error::InfraError, redis::RedisListStore, telemetry},
};
use fanfeed_api_types::{FanoutResponse, FeedPageResponse};
use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const FANOUT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let report = ErrorReport::from_error("fanfeed::main", error);

    if dispatcher::has_been_set() {
        error!(
            error = %error,
            chain = ?report.messages,
            client_error = error.is_client_error(),
            "application error"
        );
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, chain = ?report.messages, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Worker(Box::<config::WorkerArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Worker(_) => run_worker(settings).await,
        config::Command::Fanout(args) => run_fanout(settings, args).await,
        config::Command::Feed(args) => run_feed(settings, args).await,
        config::Command::Invalidate(args) => run_invalidate(settings, args).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_worker(settings: config::Settings) -> Result<(), AppError> {
    let repositories = connect_repositories(&settings, settings.database.max_connections.get())
        .await?;
    migrate(&repositories).await?;
    let job_repositories =
        connect_repositories(&settings, settings.database.jobs_max_connections.get()).await?;
    job_repositories
        .health_check()
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    let cache = build_cache(&settings).await?;
    let app = build_application_context(repositories, cache, &settings);

    let monitor_handle =
        spawn_job_monitor(job_repositories, app.job_context.clone(), &settings.fanout);

    let consumer = app.trigger.consumer().clone();
    let interval = settings.events.consume_interval;
    let consume_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let summary = consumer.consume().await;
            if summary.processed > 0 {
                info!(
                    target = "fanfeed::worker",
                    processed = summary.processed,
                    fanned_out = summary.fanned_out,
                    invalidated = summary.invalidated,
                    requeued = summary.requeued,
                    dropped = summary.dropped,
                    "feed events consumed"
                );
            }
        }
    });

    info!(
        target = "fanfeed::worker",
        concurrency = settings.fanout.worker_concurrency.get(),
        cache_enabled = settings.cache.enabled,
        "worker started"
    );

    let result = tokio::signal::ctrl_c()
        .await
        .map_err(|err| AppError::from(InfraError::Io(err)));

    info!(target = "fanfeed::worker", "shutting down");

    monitor_handle.abort();
    let _ = monitor_handle.await;
    consume_handle.abort();
    let _ = consume_handle.await;

    result
}

async fn run_fanout(settings: config::Settings, args: config::FanoutArgs) -> Result<(), AppError> {
    let repositories = connect_repositories(&settings, settings.database.max_connections.get())
        .await?;
    let cache = build_cache(&settings).await?;
    let app = build_application_context(repositories.clone(), cache, &settings);

    let report = if args.inline {
        let post = repositories
            .find_post(args.post_id)
            .await?
            .ok_or(FanoutError::PostNotFound(args.post_id))?;
        app.fanout.fanout_inline(&post).await?
    } else {
        app.fanout.fanout_post(args.post_id).await?
    };

    info!(
        target = "fanfeed::fanout",
        post_id = %report.post_id,
        mode = %report.mode,
        "{report}"
    );

    if args.wait {
        for job_id in &report.job_ids {
            wait_for_job_completion(app.jobs.as_ref(), job_id, FANOUT_WAIT_TIMEOUT).await?;
        }
        info!(
            target = "fanfeed::fanout",
            jobs = report.job_ids.len(),
            "all fanout batches completed"
        );
    }

    print_json(&FanoutResponse::from(&report))
}

async fn run_feed(settings: config::Settings, args: config::FeedArgs) -> Result<(), AppError> {
    let before = match (args.before.as_deref(), args.before_time.as_deref()) {
        (Some(raw), _) => Some(FeedCursor::decode(raw).map_err(FeedError::from)?),
        (None, Some(raw)) => Some(FeedCursor::before_time(parse_timestamp(raw)?)),
        (None, None) => None,
    };
    let after = match (args.after.as_deref(), args.after_time.as_deref()) {
        (Some(raw), _) => Some(FeedCursor::decode(raw).map_err(FeedError::from)?),
        (None, Some(raw)) => Some(FeedCursor::after_time(parse_timestamp(raw)?)),
        (None, None) => None,
    };

    let repositories = connect_repositories(&settings, settings.database.max_connections.get())
        .await?;
    let cache = build_cache(&settings).await?;
    let app = build_application_context(repositories, cache, &settings);

    let query = FeedQuery {
        before,
        after,
        page_size: args.page_size,
    };
    let page = app.feed.get_feed_page(args.user_id, query).await?;

    print_json(&FeedPageResponse::from(page))
}

async fn run_invalidate(
    settings: config::Settings,
    args: config::InvalidateArgs,
) -> Result<(), AppError> {
    if settings.cache.backend == CacheBackend::Memory {
        warn!(
            target = "fanfeed::invalidate",
            "memory cache is process-local; nothing outside this process is affected"
        );
    }

    let cache = build_cache(&settings).await?;
    cache.invalidate(&ListKey::newsfeed(args.user_id)).await;

    info!(
        target = "fanfeed::invalidate",
        user_id = %args.user_id,
        "cached newsfeed dropped"
    );
    Ok(())
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let repositories = connect_repositories(&settings, 1).await?;
    migrate(&repositories).await?;
    info!(target = "fanfeed::migrate", "migrations applied");
    Ok(())
}

struct ApplicationContext {
    feed: Arc<FeedService>,
    fanout: Arc<FanoutService>,
    trigger: Arc<FeedTrigger>,
    job_context: JobWorkerContext,
    jobs: Arc<dyn JobsRepo>,
}

async fn connect_repositories(
    settings: &config::Settings,
    max_connections: u32,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(database_url, max_connections)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    let chunk_size = settings.fanout.insert_chunk_size.get() as usize;
    Ok(Arc::new(
        PostgresRepositories::new(pool).with_insert_chunk_size(chunk_size),
    ))
}

async fn migrate(repositories: &PostgresRepositories) -> Result<(), AppError> {
    PostgresRepositories::run_migrations(repositories.pool())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    PostgresRepositories::setup_job_storage(repositories.pool())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))
}

async fn build_cache(settings: &config::Settings) -> Result<Arc<BoundedListCache>, AppError> {
    let cache_config = CacheConfig::from(&settings.cache);
    if !cache_config.enabled {
        return Ok(Arc::new(BoundedListCache::disabled(cache_config.horizon)));
    }

    let cache = match cache_config.backend {
        CacheBackend::Memory => BoundedListCache::in_memory(&cache_config),
        CacheBackend::Redis => {
            let url = cache_config
                .redis_url
                .as_deref()
                .ok_or_else(|| InfraError::configuration("cache.redis_url is not configured"))?;
            let store = RedisListStore::connect(url)
                .await
                .map_err(|err| InfraError::cache(err.to_string()))?;
            BoundedListCache::new(Arc::new(store), &cache_config)
        }
    };

    Ok(Arc::new(cache))
}

fn build_application_context(
    repositories: Arc<PostgresRepositories>,
    cache: Arc<BoundedListCache>,
    settings: &config::Settings,
) -> ApplicationContext {
    let newsfeeds_repo: Arc<dyn NewsfeedRepo> = repositories.clone();
    let posts_repo: Arc<dyn PostsRepo> = repositories.clone();
    let friendships_repo: Arc<dyn FriendshipsRepo> = repositories.clone();
    let jobs_repo: Arc<dyn JobsRepo> = repositories;

    let executor = Arc::new(BatchExecutor::new(newsfeeds_repo.clone(), cache.clone()));
    let max_attempts = i32::try_from(settings.fanout.max_attempts.get()).unwrap_or(i32::MAX);
    let dispatcher: Arc<dyn BatchDispatcher> =
        Arc::new(QueuedDispatcher::new(jobs_repo.clone(), max_attempts));

    let fanout = Arc::new(FanoutService::new(
        posts_repo,
        friendships_repo,
        executor.clone(),
        dispatcher,
        FanoutSettings::from(&settings.fanout),
    ));
    let feed = Arc::new(FeedService::new(
        newsfeeds_repo,
        cache.clone(),
        FeedSettings::from(&settings.feed),
    ));

    let queue = Arc::new(EventQueue::new());
    let consumer = Arc::new(EventConsumer::new(
        queue.clone(),
        fanout.clone(),
        cache,
        ConsumerSettings::from(&settings.events),
    ));
    let trigger = Arc::new(FeedTrigger::new(queue, consumer, false));

    ApplicationContext {
        feed,
        fanout,
        trigger,
        job_context: JobWorkerContext { executor },
        jobs: jobs_repo,
    }
}

fn spawn_job_monitor(
    repositories: Arc<PostgresRepositories>,
    context: JobWorkerContext,
    fanout: &config::FanoutSettings,
) -> tokio::task::JoinHandle<()> {
    let storage: PostgresStorage<FanoutBatchJobPayload> = PostgresStorage::new_with_config(
        repositories.pool().clone(),
        ApalisSqlConfig::new(JobType::FanoutBatch.as_str()),
    );

    let worker = WorkerBuilder::new("fanout-batch-worker")
        .concurrency(fanout.worker_concurrency.get() as usize)
        .data(context)
        .backend(storage)
        .build_fn(process_fanout_batch_job);

    let monitor = Monitor::new().register(worker);

    tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "job monitor stopped");
        }
    })
}

fn parse_timestamp(raw: &str) -> Result<OffsetDateTime, AppError> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|err| AppError::validation(format!("invalid timestamp `{raw}`: {err}")))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
