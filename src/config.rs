//! Environment-driven configuration.
//!
//! Everything the engine consumes comes from environment variables, read
//! once at boot into an immutable [`Settings`] that is passed down as an
//! explicit dependency. Unparseable values fail fast with `ConfigError`.
//!
//! | Env Var | Default | Purpose |
//! |---------|---------|---------|
//! | `DATABASE_PATH` | `leeksaver.db` | SQLite store location |
//! | `SYNC_L1_DAILY_TIME` | `17:30` | Wall-clock HH:MM for the L1 wave |
//! | `SYNC_L2_INTERVAL_SECONDS` | `300` | L2 polling period |
//! | `SYNC_L2_TASK_OFFSET_SECONDS` | `120` | Stagger between L2 tasks |
//! | `REALTIME_CACHE_TTL` | `10` | L3 cache TTL seconds |
//! | `SYNC_FINANCIAL_DAY_OF_WEEK` | `5` | Weekly financial sync day (0=Mon) |
//! | `SYNC_FINANCIAL_HOUR` / `_MINUTE` | `20` / `0` | Weekly financial sync time |
//! | `CLEANUP_NEWS_DAY_OF_WEEK` | `0` | Weekly news cleanup day (0=Mon) |
//! | `CLEANUP_NEWS_HOUR` / `_MINUTE` | `2` / `0` | Weekly news cleanup time |
//! | `SYNC_BATCH_SIZE` | `50` | Symbols per shard |
//! | `UPSTREAM_RATE_QPS` | `5` | Token-bucket refill rate |
//! | `NEWS_RETENTION_DAYS` | `90` | News cleanup horizon |
//! | `NEWS_CLEANUP_PROTECT_WATCHLIST` | `true` | Keep watchlist-related news |
//! | `SYMBOL_ENRICH_PREFER` | `secondary` | Industry merge precedence |
//! | `INDICATOR_RECOMPUTE_ALL` | `false` | Recompute full lookback on drift |
//! | `EMBEDDING_API_URL` | (none) | Embedding service — unset disables it |
//! | `EMBEDDING_API_KEY` | (none) | Embedding service credential |
//! | `EMBEDDING_BATCH_SIZE` | `64` | Provider-declared max batch size |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{NaiveTime, Weekday};

use crate::error::{SyncError, SyncResult};

/// Worker pool size for the job runtime.
pub const WORKER_COUNT: usize = 4;
/// Scopes larger than this are split into shards.
pub const SHARD_THRESHOLD: usize = 100;
/// Default rows per write chunk before the bind-parameter ceiling applies.
pub const CHUNK_ROWS: usize = 3_000;
/// Unresolved sync errors with this many retries are quarantined.
pub const QUARANTINE_RETRIES: i64 = 5;
/// Token-bucket capacity.
pub const RATE_BUCKET_CAPACITY: f64 = 5.0;
/// How long a stale realtime-cache entry may still be served after a miss.
pub const STALE_GRACE: Duration = Duration::from_secs(60);
/// Coverage below this fraction triggers doctor backfill.
pub const COVERAGE_TARGET: f64 = 0.95;
/// Lookback window for indicator computation, in bars.
pub const INDICATOR_LOOKBACK: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichPrefer {
    Primary,
    Secondary,
}

/// A weekly cron-like slot: day of week plus wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklySpec {
    pub weekday: Weekday,
    pub time: NaiveTime,
}

#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub api_url: String,
    pub api_key: String,
    pub max_batch: usize,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_path: PathBuf,
    pub l1_daily_time: NaiveTime,
    pub l2_interval: Duration,
    pub l2_task_offset: Duration,
    pub realtime_cache_ttl: Duration,
    pub financial_schedule: WeeklySpec,
    pub cleanup_schedule: WeeklySpec,
    pub sync_batch_size: usize,
    pub rate_qps: f64,
    pub news_retention_days: i64,
    pub protect_watchlist_news: bool,
    pub enrich_prefer: EnrichPrefer,
    pub indicator_recompute_all: bool,
    pub embedding: Option<EmbeddingSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("leeksaver.db"),
            l1_daily_time: NaiveTime::from_hms_opt(17, 30, 0).unwrap(),
            l2_interval: Duration::from_secs(300),
            l2_task_offset: Duration::from_secs(120),
            realtime_cache_ttl: Duration::from_secs(10),
            financial_schedule: WeeklySpec {
                weekday: Weekday::Sat,
                time: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            },
            cleanup_schedule: WeeklySpec {
                weekday: Weekday::Mon,
                time: NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
            },
            sync_batch_size: 50,
            rate_qps: 5.0,
            news_retention_days: 90,
            protect_watchlist_news: true,
            enrich_prefer: EnrichPrefer::Secondary,
            indicator_recompute_all: false,
            embedding: None,
        }
    }
}

impl Settings {
    /// Read every recognized option from the environment, falling back to
    /// defaults for unset variables.
    pub fn from_env() -> SyncResult<Self> {
        let d = Settings::default();

        let financial_schedule = WeeklySpec {
            weekday: weekday_var("SYNC_FINANCIAL_DAY_OF_WEEK", d.financial_schedule.weekday)?,
            time: hm_time(
                parsed_var("SYNC_FINANCIAL_HOUR", 20u32)?,
                parsed_var("SYNC_FINANCIAL_MINUTE", 0u32)?,
            )?,
        };
        let cleanup_schedule = WeeklySpec {
            weekday: weekday_var("CLEANUP_NEWS_DAY_OF_WEEK", d.cleanup_schedule.weekday)?,
            time: hm_time(
                parsed_var("CLEANUP_NEWS_HOUR", 2u32)?,
                parsed_var("CLEANUP_NEWS_MINUTE", 0u32)?,
            )?,
        };

        let embedding = match std::env::var("EMBEDDING_API_URL") {
            Ok(api_url) if !api_url.is_empty() => Some(EmbeddingSettings {
                api_url,
                api_key: std::env::var("EMBEDDING_API_KEY").unwrap_or_default(),
                max_batch: parsed_var("EMBEDDING_BATCH_SIZE", 64usize)?,
            }),
            _ => None,
        };

        Ok(Settings {
            database_path: std::env::var("DATABASE_PATH")
                .map_or(d.database_path, PathBuf::from),
            l1_daily_time: time_var("SYNC_L1_DAILY_TIME", d.l1_daily_time)?,
            l2_interval: Duration::from_secs(parsed_var(
                "SYNC_L2_INTERVAL_SECONDS",
                d.l2_interval.as_secs(),
            )?),
            l2_task_offset: Duration::from_secs(parsed_var(
                "SYNC_L2_TASK_OFFSET_SECONDS",
                d.l2_task_offset.as_secs(),
            )?),
            realtime_cache_ttl: Duration::from_secs(parsed_var(
                "REALTIME_CACHE_TTL",
                d.realtime_cache_ttl.as_secs(),
            )?),
            financial_schedule,
            cleanup_schedule,
            sync_batch_size: parsed_var("SYNC_BATCH_SIZE", d.sync_batch_size)?,
            rate_qps: parsed_var("UPSTREAM_RATE_QPS", d.rate_qps)?,
            news_retention_days: parsed_var("NEWS_RETENTION_DAYS", d.news_retention_days)?,
            protect_watchlist_news: bool_var(
                "NEWS_CLEANUP_PROTECT_WATCHLIST",
                d.protect_watchlist_news,
            )?,
            enrich_prefer: prefer_var("SYMBOL_ENRICH_PREFER", d.enrich_prefer)?,
            indicator_recompute_all: bool_var(
                "INDICATOR_RECOMPUTE_ALL",
                d.indicator_recompute_all,
            )?,
            embedding,
        })
    }
}

fn config_err(var: &str, value: &str) -> SyncError {
    SyncError::ConfigError(format!("invalid value for {var}: {value:?}"))
}

fn parsed_var<T: FromStr>(var: &str, default: T) -> SyncResult<T> {
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|_| config_err(var, &raw)),
        Err(_) => Ok(default),
    }
}

fn bool_var(var: &str, default: bool) -> SyncResult<bool> {
    match std::env::var(var) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(config_err(var, &raw)),
        },
        Err(_) => Ok(default),
    }
}

/// HH:MM wall-clock time.
fn time_var(var: &str, default: NaiveTime) -> SyncResult<NaiveTime> {
    match std::env::var(var) {
        Ok(raw) => {
            NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|_| config_err(var, &raw))
        }
        Err(_) => Ok(default),
    }
}

/// Day of week as 0=Monday .. 6=Sunday.
fn weekday_var(var: &str, default: Weekday) -> SyncResult<Weekday> {
    match std::env::var(var) {
        Ok(raw) => {
            let n: u8 = raw.trim().parse().map_err(|_| config_err(var, &raw))?;
            match n {
                0 => Ok(Weekday::Mon),
                1 => Ok(Weekday::Tue),
                2 => Ok(Weekday::Wed),
                3 => Ok(Weekday::Thu),
                4 => Ok(Weekday::Fri),
                5 => Ok(Weekday::Sat),
                6 => Ok(Weekday::Sun),
                _ => Err(config_err(var, &raw)),
            }
        }
        Err(_) => Ok(default),
    }
}

fn prefer_var(var: &str, default: EnrichPrefer) -> SyncResult<EnrichPrefer> {
    match std::env::var(var) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(EnrichPrefer::Primary),
            "secondary" => Ok(EnrichPrefer::Secondary),
            _ => Err(config_err(var, &raw)),
        },
        Err(_) => Ok(default),
    }
}

fn hm_time(hour: u32, minute: u32) -> SyncResult<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| {
        SyncError::ConfigError(format!("invalid wall-clock time {hour:02}:{minute:02}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy_knobs() {
        let s = Settings::default();
        assert_eq!(s.l1_daily_time, NaiveTime::from_hms_opt(17, 30, 0).unwrap());
        assert_eq!(s.l2_interval, Duration::from_secs(300));
        assert_eq!(s.l2_task_offset, Duration::from_secs(120));
        assert_eq!(s.realtime_cache_ttl, Duration::from_secs(10));
        assert_eq!(s.sync_batch_size, 50);
        assert_eq!(s.financial_schedule.weekday, Weekday::Sat);
        assert_eq!(s.cleanup_schedule.weekday, Weekday::Mon);
    }

    #[test]
    fn hm_time_rejects_out_of_range() {
        assert!(hm_time(24, 0).is_err());
        assert!(hm_time(20, 0).is_ok());
    }
}
