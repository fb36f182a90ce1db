//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{
    CliArgs, Command, DatabaseOverride, MigrateArgs, RedisOverride, ServeArgs, ServeOverrides,
    WarmArgs,
};

use std::{net::SocketAddr, num::NonZeroU32, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::CacheStrategy;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "flashsale";
const ENV_PREFIX: &str = "FLASHSALE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8081;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 16;
const DEFAULT_REDIS_COMMAND_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_SHOP_TTL_SECS: u64 = 30 * 60;
const DEFAULT_SHOP_TYPE_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_NULL_TTL_SECS: u64 = 2 * 60;
const DEFAULT_REBUILD_LOCK_LEASE_SECS: u64 = 10;
const DEFAULT_REBUILD_CONCURRENCY: u32 = 10;
const DEFAULT_MUTEX_MAX_RETRIES: u32 = 5;
const DEFAULT_MUTEX_RETRY_BACKOFF_MS: u64 = 50;
const DEFAULT_WARM_LIMIT: u32 = 500;
const DEFAULT_SECKILL_LOCK_LEASE_SECS: u64 = 1_200;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub cache: CacheSettings,
    pub seckill: SeckillSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
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
    pub run_migrations: bool,
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    /// `None` selects the in-process store, which only coordinates a single instance.
    pub url: Option<String>,
    pub command_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub shop_ttl: Duration,
    pub shop_type_ttl: Duration,
    pub null_ttl: Duration,
    pub rebuild_lock_lease: Duration,
    pub rebuild_concurrency: NonZeroU32,
    pub mutex_max_retries: NonZeroU32,
    pub mutex_retry_backoff: Duration,
    pub shop_strategy: CacheStrategy,
    pub warm_on_startup: bool,
    pub warm_limit: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct SeckillSettings {
    pub lock_lease: Duration,
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
    raw.apply_command_overrides(cli.command.as_ref());

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
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    redis: RawRedisSettings,
    cache: RawCacheSettings,
    seckill: RawSeckillSettings,
}

impl RawSettings {
    fn apply_command_overrides(&mut self, command: Option<&Command>) {
        match command {
            Some(Command::Serve(args)) => self.apply_serve_overrides(&args.overrides),
            Some(Command::Warm(args)) => {
                self.apply_database_override(&args.database);
                self.apply_redis_override(&args.redis);
                if let Some(limit) = args.limit {
                    self.cache.warm_limit = Some(limit);
                }
            }
            Some(Command::Migrate(args)) => self.apply_database_override(&args.database),
            None => self.apply_serve_overrides(&ServeOverrides::default()),
        }
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_database_override(&overrides.database);
        self.apply_redis_override(&overrides.redis);

        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(strategy) = overrides.cache_shop_strategy.as_ref() {
            self.cache.shop_strategy = Some(strategy.clone());
        }
        if let Some(warm) = overrides.cache_warm_on_startup {
            self.cache.warm_on_startup = Some(warm);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }

    fn apply_redis_override(&mut self, overrides: &RedisOverride) {
        if let Some(url) = overrides.redis_url.as_ref() {
            self.redis.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            redis,
            cache,
            seckill,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            redis: build_redis_settings(redis)?,
            cache: build_cache_settings(cache)?,
            seckill: build_seckill_settings(seckill)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_shutdown = positive_duration(
        server.graceful_shutdown_seconds,
        DEFAULT_GRACEFUL_SHUTDOWN_SECS,
        "server.graceful_shutdown_seconds",
        Duration::from_secs,
    )?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
    })
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
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url: non_empty(database.url),
        max_connections,
        run_migrations: database.run_migrations.unwrap_or(true),
    })
}

fn build_redis_settings(redis: RawRedisSettings) -> Result<RedisSettings, LoadError> {
    let command_timeout = positive_duration(
        redis.command_timeout_ms,
        DEFAULT_REDIS_COMMAND_TIMEOUT_MS,
        "redis.command_timeout_ms",
        Duration::from_millis,
    )?;

    Ok(RedisSettings {
        url: non_empty(redis.url),
        command_timeout,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let shop_strategy = match cache.shop_strategy {
        Some(value) => CacheStrategy::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.shop_strategy", reason))?,
        None => CacheStrategy::LogicalExpire,
    };

    let shop_ttl = positive_duration(
        cache.shop_ttl_seconds,
        DEFAULT_SHOP_TTL_SECS,
        "cache.shop_ttl_seconds",
        Duration::from_secs,
    )?;
    let shop_type_ttl = positive_duration(
        cache.shop_type_ttl_seconds,
        DEFAULT_SHOP_TYPE_TTL_SECS,
        "cache.shop_type_ttl_seconds",
        Duration::from_secs,
    )?;
    let null_ttl = positive_duration(
        cache.null_ttl_seconds,
        DEFAULT_NULL_TTL_SECS,
        "cache.null_ttl_seconds",
        Duration::from_secs,
    )?;
    if null_ttl > shop_ttl {
        return Err(LoadError::invalid(
            "cache.null_ttl_seconds",
            "must not exceed cache.shop_ttl_seconds",
        ));
    }
    let rebuild_lock_lease = positive_duration(
        cache.rebuild_lock_lease_seconds,
        DEFAULT_REBUILD_LOCK_LEASE_SECS,
        "cache.rebuild_lock_lease_seconds",
        Duration::from_secs,
    )?;

    Ok(CacheSettings {
        shop_ttl,
        shop_type_ttl,
        null_ttl,
        rebuild_lock_lease,
        rebuild_concurrency: non_zero_u32(
            cache
                .rebuild_concurrency
                .unwrap_or(DEFAULT_REBUILD_CONCURRENCY)
                .into(),
            "cache.rebuild_concurrency",
        )?,
        mutex_max_retries: non_zero_u32(
            cache
                .mutex_max_retries
                .unwrap_or(DEFAULT_MUTEX_MAX_RETRIES)
                .into(),
            "cache.mutex_max_retries",
        )?,
        mutex_retry_backoff: Duration::from_millis(
            cache
                .mutex_retry_backoff_ms
                .unwrap_or(DEFAULT_MUTEX_RETRY_BACKOFF_MS),
        ),
        shop_strategy,
        warm_on_startup: cache.warm_on_startup.unwrap_or(true),
        warm_limit: non_zero_u32(
            cache.warm_limit.unwrap_or(DEFAULT_WARM_LIMIT).into(),
            "cache.warm_limit",
        )?,
    })
}

fn build_seckill_settings(seckill: RawSeckillSettings) -> Result<SeckillSettings, LoadError> {
    let lock_lease = positive_duration(
        seckill.lock_lease_seconds,
        DEFAULT_SECKILL_LOCK_LEASE_SECS,
        "seckill.lock_lease_seconds",
        Duration::from_secs,
    )?;
    Ok(SeckillSettings { lock_lease })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
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
    run_migrations: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRedisSettings {
    url: Option<String>,
    command_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    shop_ttl_seconds: Option<u64>,
    shop_type_ttl_seconds: Option<u64>,
    null_ttl_seconds: Option<u64>,
    rebuild_lock_lease_seconds: Option<u64>,
    rebuild_concurrency: Option<u32>,
    mutex_max_retries: Option<u32>,
    mutex_retry_backoff_ms: Option<u64>,
    shop_strategy: Option<String>,
    warm_on_startup: Option<bool>,
    warm_limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSeckillSettings {
    lock_lease_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn positive_duration(
    value: Option<u64>,
    default: u64,
    key: &'static str,
    unit: fn(u64) -> Duration,
) -> Result<Duration, LoadError> {
    match value.unwrap_or(default) {
        0 => Err(LoadError::invalid(key, "must be greater than zero")),
        value => Ok(unit(value)),
    }
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
