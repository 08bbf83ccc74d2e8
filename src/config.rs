//! Configuration types.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use secrecy::SecretString;

use crate::error::ConfigError;

/// Backoff policy for transient publish failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per destination, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles per attempt after that.
    pub base_delay: Duration,
    /// Ceiling for the computed delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the next attempt after `attempt` failed (1-based).
    ///
    /// Exponential doubling capped at `max_delay`, with up to 20% jitter
    /// so retries from parallel dispatches don't align.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self.base_delay.saturating_mul(1u32 << exp);
        let capped = raw.min(self.max_delay);
        let jitter_ms = capped.as_millis() as u64 / 5;
        if jitter_ms == 0 {
            return capped;
        }
        capped + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Bot API token.
    pub bot_token: SecretString,
    /// User IDs allowed to use admin commands.
    pub admin_ids: HashSet<i64>,
    /// Path to the local libSQL database file.
    pub db_path: PathBuf,
    /// Bounded inbound event queue depth.
    pub queue_depth: usize,
    /// Worker-pool bound on concurrent publish calls.
    pub max_concurrent_publishes: usize,
    /// Long-poll timeout for getUpdates.
    pub poll_timeout_secs: u64,
    /// Retry policy for transient publish failures.
    pub retry: RetryPolicy,
}

impl MirrorConfig {
    /// Build the configuration from environment variables.
    ///
    /// `BOT_TOKEN` is required. `ADMIN_IDS` is a comma-separated list of
    /// numeric user IDs; non-numeric entries are ignored. Tunables fall
    /// back to defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = std::env::var("BOT_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("BOT_TOKEN".into()))?;

        let admin_ids = parse_admin_ids(&std::env::var("ADMIN_IDS").unwrap_or_default());

        let db_path = std::env::var("MIRROR_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/mirror.db"));

        let defaults = Self::defaults(SecretString::from(bot_token), admin_ids, db_path);
        Ok(Self {
            queue_depth: env_usize("MIRROR_QUEUE_DEPTH", defaults.queue_depth)?,
            max_concurrent_publishes: env_usize(
                "MIRROR_MAX_CONCURRENT",
                defaults.max_concurrent_publishes,
            )?,
            poll_timeout_secs: env_u64("MIRROR_POLL_TIMEOUT_SECS", defaults.poll_timeout_secs)?,
            ..defaults
        })
    }

    fn defaults(bot_token: SecretString, admin_ids: HashSet<i64>, db_path: PathBuf) -> Self {
        Self {
            bot_token,
            admin_ids,
            db_path,
            queue_depth: 64,
            max_concurrent_publishes: 8,
            poll_timeout_secs: 25,
            retry: RetryPolicy::default(),
        }
    }
}

/// Parse a comma-separated admin ID list, skipping non-numeric entries.
fn parse_admin_ids(raw: &str) -> HashSet<i64> {
    raw.split(',')
        .filter_map(|s| s.trim().parse::<i64>().ok())
        .collect()
}

fn env_usize(key: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.into(),
            message: format!("expected a positive integer, got '{v}'"),
        }),
        Err(_) => Ok(default),
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.into(),
            message: format!("expected a positive integer, got '{v}'"),
        }),
        Err(_) => Ok(default),
    }
}
