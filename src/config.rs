use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://studyblock.db";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// Two titles sharing this many qualifying words count as near-duplicates.
pub const DEFAULT_MIN_SHARED_WORDS: usize = 2;
/// Words shorter than this never count toward a near-duplicate match.
pub const DEFAULT_MIN_WORD_CHARS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NearDuplicateRule {
    pub min_shared_words: usize,
    pub min_word_chars: usize,
}

impl NearDuplicateRule {
    /// Zero in either field would flag every title (or empty fragments) as a
    /// duplicate, so both must be at least one.
    pub fn new(min_shared_words: usize, min_word_chars: usize) -> Result<Self, AppError> {
        if min_shared_words == 0 {
            return Err(AppError::Config(
                "NEAR_DUPLICATE_MIN_SHARED_WORDS must be at least 1".to_string(),
            ));
        }
        if min_word_chars == 0 {
            return Err(AppError::Config(
                "NEAR_DUPLICATE_MIN_WORD_CHARS must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            min_shared_words,
            min_word_chars,
        })
    }
}

impl Default for NearDuplicateRule {
    fn default() -> Self {
        Self {
            min_shared_words: DEFAULT_MIN_SHARED_WORDS,
            min_word_chars: DEFAULT_MIN_WORD_CHARS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub upstream: Option<UpstreamConfig>,
    pub sync_interval_secs: Option<u64>,
    pub near_duplicate: NearDuplicateRule,
}

impl AppConfig {
    pub fn new_from_env() -> Result<Self, AppError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr
            .parse::<SocketAddr>()
            .map_err(|e| AppError::Config(format!("BIND_ADDR {:?}: {}", bind_addr, e)))?;

        let upstream = match env::var("UPSTREAM_BASE_URL") {
            Ok(base_url) if !base_url.trim().is_empty() => Some(UpstreamConfig {
                base_url: base_url.trim_end_matches('/').to_string(),
                api_token: env::var("UPSTREAM_TOKEN").ok(),
                timeout: Duration::from_secs(
                    parse_var("UPSTREAM_TIMEOUT_SECS")?.unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS),
                ),
            }),
            _ => None,
        };

        let near_duplicate = NearDuplicateRule::new(
            parse_var("NEAR_DUPLICATE_MIN_SHARED_WORDS")?.unwrap_or(DEFAULT_MIN_SHARED_WORDS),
            parse_var("NEAR_DUPLICATE_MIN_WORD_CHARS")?.unwrap_or(DEFAULT_MIN_WORD_CHARS),
        )?;

        Ok(Self {
            database_url,
            bind_addr,
            upstream,
            sync_interval_secs: parse_var("SYNC_INTERVAL_SECS")?,
            near_duplicate,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            upstream: None,
            sync_interval_secs: None,
            near_duplicate: NearDuplicateRule::default(),
        }
    }
}

fn parse_var<T>(key: &str) -> Result<Option<T>, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| AppError::Config(format!("{} {:?}: {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}
