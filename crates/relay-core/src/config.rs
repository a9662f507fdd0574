use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    errors::Error,
    retry::{OuterRetryPolicy, RetryPolicy},
    rules::cache::CacheConfig,
    Result,
};

pub const DEFAULT_PLACEHOLDER_TEXT: &str = "[message content removed by relay edits]";

/// Tunables of the forwarding pipeline itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelaySettings {
    pub rule_cache_ttl: Duration,
    /// Sliding expiry: an entry not read for this long is refreshed.
    pub rule_cache_idle: Duration,
    pub inline_retry_attempts: u32,
    pub inline_retry_delays: Vec<Duration>,
    pub outer_retry_attempts: u32,
    pub outer_retry_delays: Vec<Duration>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            rule_cache_ttl: Duration::from_secs(5 * 60),
            rule_cache_idle: Duration::from_secs(2 * 60),
            inline_retry_attempts: 5,
            inline_retry_delays: [200, 500, 1_000, 2_000, 4_000]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
            outer_retry_attempts: 12,
            outer_retry_delays: [5, 15, 30, 60, 120, 300, 600, 900, 1_200, 1_800]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
        }
    }
}

impl RelaySettings {
    pub fn validate(&self) -> Result<()> {
        if self.inline_retry_attempts == 0 {
            return Err(Error::Config("inline retry attempts must be at least 1".into()));
        }
        if self.outer_retry_attempts == 0 {
            return Err(Error::Config("outer retry attempts must be at least 1".into()));
        }
        if self.inline_retry_delays.is_empty() {
            return Err(Error::Config("inline retry delay table is empty".into()));
        }
        if self.outer_retry_delays.is_empty() {
            return Err(Error::Config("outer retry delay table is empty".into()));
        }
        if self.rule_cache_ttl.is_zero() {
            return Err(Error::Config("rule cache ttl must be positive".into()));
        }
        if self.rule_cache_idle.is_zero() {
            return Err(Error::Config("rule cache idle time must be positive".into()));
        }
        Ok(())
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            ttl: self.rule_cache_ttl,
            idle: self.rule_cache_idle,
        }
    }

    pub fn inline_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.inline_retry_attempts, self.inline_retry_delays.clone())
    }

    pub fn outer_retry(&self) -> OuterRetryPolicy {
        OuterRetryPolicy::new(self.outer_retry_attempts, self.outer_retry_delays.clone())
    }
}

/// Process configuration for the relay binary.
#[derive(Clone, Debug)]
pub struct Config {
    pub telegram_bot_token: String,
    pub rules_file: PathBuf,
    pub workers: usize,
    pub relay: RelaySettings,
    pub media_group_timeout: Duration,
    pub placeholder_text: String,

    // Outbound throttling
    pub throttle_global: Duration,
    pub throttle_per_chat: Duration,
}

impl Config {
    /// Read the process environment, after loading `.env` if present.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })?;

        let rules_file = PathBuf::from(get("RELAY_RULES_FILE").unwrap_or("rules.json".to_string()));

        let workers = parse_num::<usize>("RELAY_WORKERS", get("RELAY_WORKERS"))?.unwrap_or(4);
        if workers == 0 {
            return Err(Error::Config("RELAY_WORKERS must be at least 1".into()));
        }

        let mut relay = RelaySettings::default();
        if let Some(secs) = parse_num::<u64>("RULE_CACHE_TTL_SECS", get("RULE_CACHE_TTL_SECS"))? {
            relay.rule_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_num::<u64>("RULE_CACHE_IDLE_SECS", get("RULE_CACHE_IDLE_SECS"))? {
            relay.rule_cache_idle = Duration::from_secs(secs);
        }
        if let Some(n) = parse_num::<u32>("INLINE_RETRY_ATTEMPTS", get("INLINE_RETRY_ATTEMPTS"))? {
            relay.inline_retry_attempts = n;
        }
        if let Some(raw) = get("INLINE_RETRY_DELAYS_MS") {
            relay.inline_retry_delays = parse_delays("INLINE_RETRY_DELAYS_MS", &raw)?
                .into_iter()
                .map(Duration::from_millis)
                .collect();
        }
        if let Some(n) = parse_num::<u32>("OUTER_RETRY_ATTEMPTS", get("OUTER_RETRY_ATTEMPTS"))? {
            relay.outer_retry_attempts = n;
        }
        if let Some(raw) = get("OUTER_RETRY_DELAYS_SECS") {
            relay.outer_retry_delays = parse_delays("OUTER_RETRY_DELAYS_SECS", &raw)?
                .into_iter()
                .map(Duration::from_secs)
                .collect();
        }
        relay.validate()?;

        let media_group_timeout = Duration::from_millis(
            parse_num::<u64>("MEDIA_GROUP_TIMEOUT_MS", get("MEDIA_GROUP_TIMEOUT_MS"))?
                .unwrap_or(1000),
        );
        let placeholder_text =
            get("RELAY_PLACEHOLDER_TEXT").unwrap_or(DEFAULT_PLACEHOLDER_TEXT.to_string());

        let throttle_global = Duration::from_millis(
            parse_num::<u64>("THROTTLE_GLOBAL_MS", get("THROTTLE_GLOBAL_MS"))?.unwrap_or(40),
        );
        let throttle_per_chat = Duration::from_millis(
            parse_num::<u64>("THROTTLE_PER_CHAT_MS", get("THROTTLE_PER_CHAT_MS"))?
                .unwrap_or(1050),
        );

        Ok(Self {
            telegram_bot_token,
            rules_file,
            workers,
            relay,
            media_group_timeout,
            placeholder_text,
            throttle_global,
            throttle_per_chat,
        })
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>> {
    raw.map(|s| {
        s.parse::<T>()
            .map_err(|_| Error::Config(format!("{key} must be a non-negative integer, got {s:?}")))
    })
    .transpose()
}

fn parse_delays(key: &str, raw: &str) -> Result<Vec<u64>> {
    let out = raw
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map_err(|_| Error::Config(format!("{key}: invalid delay {s:?}")))
        })
        .collect::<Result<Vec<_>>>()?;
    if out.is_empty() {
        return Err(Error::Config(format!("{key} must list at least one delay")));
    }
    Ok(out)
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}
