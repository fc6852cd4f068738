use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use uuid::Uuid;

/// Command-line arguments for the fanfeed binary.
#[derive(Debug, Parser)]
#[command(
    name = "fanfeed",
    version,
    about = "Newsfeed fan-out workers and feed cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "FANFEED_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run fan-out workers and the feed event consumer until interrupted.
    Worker(Box<WorkerArgs>),
    /// Fan out a stored post to its author and their followers.
    Fanout(FanoutArgs),
    /// Print one page of a user's newsfeed as JSON.
    Feed(FeedArgs),
    /// Drop a user's cached newsfeed.
    Invalidate(InvalidateArgs),
    /// Apply database migrations and prepare job storage.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverride {
    /// Override the cache backend (memory|redis).
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub cache_backend: Option<String>,

    /// Override the Redis connection URL.
    #[arg(long = "cache-redis-url", value_name = "URL")]
    pub cache_redis_url: Option<String>,

    /// Disable the list cache entirely.
    #[arg(long = "no-cache", action = clap::ArgAction::SetTrue)]
    pub no_cache: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub overrides: WorkerOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WorkerOverrides {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub cache: CacheOverride,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the jobs database pool size.
    #[arg(long = "database-jobs-max-connections", value_name = "COUNT")]
    pub database_jobs_max_connections: Option<u32>,

    /// Override the cache horizon (entries kept per user).
    #[arg(long = "cache-horizon", value_name = "COUNT")]
    pub cache_horizon: Option<u64>,

    /// Override the fan-out batch size.
    #[arg(long = "fanout-batch-size", value_name = "COUNT")]
    pub fanout_batch_size: Option<u32>,

    /// Override the fan-out worker concurrency.
    #[arg(long = "fanout-worker-concurrency", value_name = "COUNT")]
    pub fanout_worker_concurrency: Option<u32>,

    /// Override the event consume interval.
    #[arg(long = "events-consume-interval-ms", value_name = "MILLIS")]
    pub events_consume_interval_ms: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct FanoutArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub cache: CacheOverride,

    /// Post to deliver.
    #[arg(value_name = "POST_ID")]
    pub post_id: Uuid,

    /// Deliver every batch in this process instead of enqueueing jobs.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub inline: bool,

    /// Wait for enqueued batches to finish.
    #[arg(long, action = clap::ArgAction::SetTrue, conflicts_with = "inline")]
    pub wait: bool,
}

#[derive(Debug, Args, Clone)]
pub struct FeedArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub cache: CacheOverride,

    /// Feed owner.
    #[arg(value_name = "USER_ID")]
    pub user_id: Uuid,

    /// Cursor returned by a previous page; lists strictly older entries.
    #[arg(long, value_name = "CURSOR")]
    pub before: Option<String>,

    /// Cursor of the newest known entry; lists strictly newer entries.
    #[arg(long, value_name = "CURSOR", conflicts_with = "after_time")]
    pub after: Option<String>,

    /// RFC 3339 timestamp; lists entries strictly older than it.
    #[arg(long = "before-time", value_name = "TIMESTAMP", conflicts_with = "before")]
    pub before_time: Option<String>,

    /// RFC 3339 timestamp; lists entries strictly newer than it.
    #[arg(long = "after-time", value_name = "TIMESTAMP", conflicts_with = "after")]
    pub after_time: Option<String>,

    /// Entries per page (clamped to the configured maximum).
    #[arg(long = "page-size", value_name = "COUNT")]
    pub page_size: Option<u32>,
}

#[derive(Debug, Args, Clone)]
pub struct InvalidateArgs {
    #[command(flatten)]
    pub cache: CacheOverride,

    /// Feed owner whose cached list is dropped.
    #[arg(value_name = "USER_ID")]
    pub user_id: Uuid,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}
