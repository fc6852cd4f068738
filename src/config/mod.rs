//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{
    CacheOverride, CliArgs, Command, DatabaseOverride, FanoutArgs, FeedArgs, InvalidateArgs,
    MigrateArgs, WorkerArgs, WorkerOverrides,
};

use std::{
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::CacheBackend;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "fanfeed";
const ENV_PREFIX: &str = "FANFEED";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_JOBS_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_CACHE_HORIZON: u64 = 200;
const DEFAULT_CACHE_MEMORY_MAX_KEYS: u64 = 10_000;
const DEFAULT_CACHE_KEY_PREFIX: &str = "newsfeeds";
const DEFAULT_FANOUT_BATCH_SIZE: u32 = 1000;
const DEFAULT_FANOUT_INSERT_CHUNK_SIZE: u32 = 500;
const MAX_FANOUT_INSERT_CHUNK_SIZE: u32 = 16_000;
const DEFAULT_FANOUT_WORKER_CONCURRENCY: u32 = 4;
const DEFAULT_FANOUT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_FEED_PAGE_SIZE: u32 = 20;
const DEFAULT_FEED_MAX_PAGE_SIZE: u32 = 100;
const DEFAULT_FEED_AFTER_CAP: u32 = 200;
const DEFAULT_FEED_STORE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_EVENTS_CONSUME_INTERVAL_MS: u64 = 1_000;
const DEFAULT_EVENTS_CONSUME_BATCH_LIMIT: u32 = 100;
const DEFAULT_EVENTS_MAX_ATTEMPTS: u32 = 3;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub fanout: FanoutSettings,
    pub feed: FeedSettings,
    pub events: EventSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub jobs_max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub backend: CacheBackend,
    pub redis_url: Option<String>,
    pub horizon: NonZeroUsize,
    pub memory_max_keys: NonZeroUsize,
    pub key_prefix: String,
}

#[derive(Debug, Clone)]
pub struct FanoutSettings {
    pub batch_size: NonZeroU32,
    pub inline_threshold: u32,
    pub insert_chunk_size: NonZeroU32,
    pub worker_concurrency: NonZeroU32,
    pub max_attempts: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub default_page_size: NonZeroU32,
    pub max_page_size: NonZeroU32,
    pub after_cap: NonZeroU32,
    pub store_timeout_ms: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct EventSettings {
    pub consume_interval: Duration,
    pub consume_batch_limit: NonZeroU32,
    pub max_attempts: NonZeroU32,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Worker(args)) => raw.apply_worker_overrides(&args.overrides),
        Some(Command::Fanout(args)) => {
            raw.apply_database_override(&args.database);
            raw.apply_cache_override(&args.cache);
        }
        Some(Command::Feed(args)) => {
            raw.apply_database_override(&args.database);
            raw.apply_cache_override(&args.cache);
        }
        Some(Command::Invalidate(args)) => raw.apply_cache_override(&args.cache),
        Some(Command::Migrate(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_worker_overrides(&WorkerOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    fanout: RawFanoutSettings,
    feed: RawFeedSettings,
    events: RawEventSettings,
}

impl RawSettings {
    fn apply_worker_overrides(&mut self, overrides: &WorkerOverrides) {
        self.apply_database_override(&overrides.database);
        self.apply_cache_override(&overrides.cache);

        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(max) = overrides.database_jobs_max_connections {
            self.database.jobs_max_connections = Some(max);
        }
        if let Some(horizon) = overrides.cache_horizon {
            self.cache.horizon = Some(horizon);
        }
        if let Some(size) = overrides.fanout_batch_size {
            self.fanout.batch_size = Some(size);
        }
        if let Some(value) = overrides.fanout_worker_concurrency {
            self.fanout.worker_concurrency = Some(value);
        }
        if let Some(interval) = overrides.events_consume_interval_ms {
            self.events.consume_interval_ms = Some(interval);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }

    fn apply_cache_override(&mut self, overrides: &CacheOverride) {
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.cache_redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
        if overrides.no_cache {
            self.cache.enabled = Some(false);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            cache,
            fanout,
            feed,
            events,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            fanout: build_fanout_settings(fanout)?,
            feed: build_feed_settings(feed)?,
            events: build_event_settings(events)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_empty(database.url);

    let max_connections = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let jobs_max_connections = database
        .jobs_max_connections
        .unwrap_or(DEFAULT_DB_JOBS_MAX_CONNECTIONS);

    Ok(DatabaseSettings {
        url,
        max_connections: non_zero_u32(max_connections.into(), "database.max_connections")?,
        jobs_max_connections: non_zero_u32(
            jobs_max_connections.into(),
            "database.jobs_max_connections",
        )?,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend.as_deref().map(str::trim) {
        None | Some("memory") => CacheBackend::Memory,
        Some("redis") => CacheBackend::Redis,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("unknown backend `{other}` (expected memory or redis)"),
            ));
        }
    };

    let redis_url = non_empty(cache.redis_url);
    let enabled = cache.enabled.unwrap_or(true);
    if enabled && backend == CacheBackend::Redis && redis_url.is_none() {
        return Err(LoadError::invalid(
            "cache.redis_url",
            "required when the redis backend is selected",
        ));
    }

    let key_prefix = cache
        .key_prefix
        .unwrap_or_else(|| DEFAULT_CACHE_KEY_PREFIX.to_string());
    if key_prefix.trim().is_empty() {
        return Err(LoadError::invalid("cache.key_prefix", "must not be empty"));
    }

    Ok(CacheSettings {
        enabled,
        backend,
        redis_url,
        horizon: non_zero_usize(
            cache.horizon.unwrap_or(DEFAULT_CACHE_HORIZON),
            "cache.horizon",
        )?,
        memory_max_keys: non_zero_usize(
            cache
                .memory_max_keys
                .unwrap_or(DEFAULT_CACHE_MEMORY_MAX_KEYS),
            "cache.memory_max_keys",
        )?,
        key_prefix,
    })
}

fn build_fanout_settings(fanout: RawFanoutSettings) -> Result<FanoutSettings, LoadError> {
    let insert_chunk_size = non_zero_u32(
        fanout
            .insert_chunk_size
            .unwrap_or(DEFAULT_FANOUT_INSERT_CHUNK_SIZE)
            .into(),
        "fanout.insert_chunk_size",
    )?;
    if insert_chunk_size.get() > MAX_FANOUT_INSERT_CHUNK_SIZE {
        return Err(LoadError::invalid(
            "fanout.insert_chunk_size",
            format!("must not exceed {MAX_FANOUT_INSERT_CHUNK_SIZE}"),
        ));
    }

    Ok(FanoutSettings {
        batch_size: non_zero_u32(
            fanout
                .batch_size
                .unwrap_or(DEFAULT_FANOUT_BATCH_SIZE)
                .into(),
            "fanout.batch_size",
        )?,
        inline_threshold: fanout.inline_threshold.unwrap_or(0),
        insert_chunk_size,
        worker_concurrency: non_zero_u32(
            fanout
                .worker_concurrency
                .unwrap_or(DEFAULT_FANOUT_WORKER_CONCURRENCY)
                .into(),
            "fanout.worker_concurrency",
        )?,
        max_attempts: non_zero_u32(
            fanout
                .max_attempts
                .unwrap_or(DEFAULT_FANOUT_MAX_ATTEMPTS)
                .into(),
            "fanout.max_attempts",
        )?,
    })
}

fn build_feed_settings(feed: RawFeedSettings) -> Result<FeedSettings, LoadError> {
    let default_page_size = non_zero_u32(
        feed.default_page_size
            .unwrap_or(DEFAULT_FEED_PAGE_SIZE)
            .into(),
        "feed.default_page_size",
    )?;
    let max_page_size = non_zero_u32(
        feed.max_page_size
            .unwrap_or(DEFAULT_FEED_MAX_PAGE_SIZE)
            .into(),
        "feed.max_page_size",
    )?;
    if default_page_size > max_page_size {
        return Err(LoadError::invalid(
            "feed.default_page_size",
            "must not exceed feed.max_page_size",
        ));
    }

    let store_timeout_ms = NonZeroU64::new(
        feed.store_timeout_ms
            .unwrap_or(DEFAULT_FEED_STORE_TIMEOUT_MS),
    )
    .ok_or_else(|| LoadError::invalid("feed.store_timeout_ms", "must be greater than zero"))?;

    Ok(FeedSettings {
        default_page_size,
        max_page_size,
        after_cap: non_zero_u32(
            feed.after_cap.unwrap_or(DEFAULT_FEED_AFTER_CAP).into(),
            "feed.after_cap",
        )?,
        store_timeout_ms,
    })
}

fn build_event_settings(events: RawEventSettings) -> Result<EventSettings, LoadError> {
    let interval_ms = events
        .consume_interval_ms
        .unwrap_or(DEFAULT_EVENTS_CONSUME_INTERVAL_MS);
    if interval_ms == 0 {
        return Err(LoadError::invalid(
            "events.consume_interval_ms",
            "must be greater than zero",
        ));
    }

    Ok(EventSettings {
        consume_interval: Duration::from_millis(interval_ms),
        consume_batch_limit: non_zero_u32(
            events
                .consume_batch_limit
                .unwrap_or(DEFAULT_EVENTS_CONSUME_BATCH_LIMIT)
                .into(),
            "events.consume_batch_limit",
        )?,
        max_attempts: non_zero_u32(
            events
                .max_attempts
                .unwrap_or(DEFAULT_EVENTS_MAX_ATTEMPTS)
                .into(),
            "events.max_attempts",
        )?,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    jobs_max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    backend: Option<String>,
    redis_url: Option<String>,
    horizon: Option<u64>,
    memory_max_keys: Option<u64>,
    key_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFanoutSettings {
    batch_size: Option<u32>,
    inline_threshold: Option<u32>,
    insert_chunk_size: Option<u32>,
    worker_concurrency: Option<u32>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFeedSettings {
    default_page_size: Option<u32>,
    max_page_size: Option<u32>,
    after_cap: Option<u32>,
    store_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEventSettings {
    consume_interval_ms: Option<u64>,
    consume_batch_limit: Option<u32>,
    max_attempts: Option<u32>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
