//! Time-bounded cache of active rules per source channel.
//!
//! An entry expires when it is older than `ttl` (absolute) or has not been
//! read for `idle` (sliding), whichever comes first. Misses are fetched from
//! the repository under the inline retry policy; a fetch that keeps failing
//! returns the error instead of an empty rule set.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::ChannelId,
    retry::RetryPolicy,
    rules::{ForwardingRule, RuleRepository},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub idle: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            idle: Duration::from_secs(120),
        }
    }
}

struct CacheEntry {
    rules: Arc<Vec<ForwardingRule>>,
    inserted: Instant,
    /// Millis since `RuleCache::epoch` of the last read.
    last_access_ms: AtomicU64,
}

pub struct RuleCache {
    repo: Arc<dyn RuleRepository>,
    cfg: CacheConfig,
    retry: RetryPolicy,
    epoch: Instant,
    entries: RwLock<HashMap<ChannelId, CacheEntry>>,
}

impl RuleCache {
    pub fn new(repo: Arc<dyn RuleRepository>, cfg: CacheConfig, retry: RetryPolicy) -> Self {
        Self {
            repo,
            cfg,
            retry,
            epoch: Instant::now(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn repository(&self) -> &Arc<dyn RuleRepository> {
        &self.repo
    }

    fn now_ms(&self) -> u64 {
        Instant::now().duration_since(self.epoch).as_millis() as u64
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        if entry.inserted.elapsed() >= self.cfg.ttl {
            return false;
        }
        let idle_ms = self
            .now_ms()
            .saturating_sub(entry.last_access_ms.load(Ordering::Relaxed));
        idle_ms < self.cfg.idle.as_millis() as u64
    }

    /// Enabled rules whose source is `source`.
    pub async fn get_active_rules(&self, source: ChannelId) -> Result<Arc<Vec<ForwardingRule>>> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&source) {
                if self.is_fresh(entry) {
                    entry.last_access_ms.store(self.now_ms(), Ordering::Relaxed);
                    return Ok(entry.rules.clone());
                }
            }
        }

        let fetched = self
            .retry
            .run("rule lookup", &CancellationToken::new(), || {
                self.repo.get_by_source_channel(source)
            })
            .await
            .inspect_err(|e| {
                tracing::error!(source = source.0, error = %e, "rule lookup failed");
            })?;

        let active: Vec<ForwardingRule> = fetched.into_iter().filter(|r| r.is_enabled).collect();
        let rules = Arc::new(active);
        tracing::debug!(source = source.0, count = rules.len(), "rule cache refreshed");

        let mut entries = self.entries.write().await;
        entries.insert(
            source,
            CacheEntry {
                rules: rules.clone(),
                inserted: Instant::now(),
                last_access_ms: AtomicU64::new(self.now_ms()),
            },
        );
        Ok(rules)
    }

    pub async fn invalidate(&self, source: ChannelId) {
        self.entries.write().await.remove(&source);
    }

    pub async fn invalidate_all(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        rules::{EditOptions, FilterOptions, InMemoryRuleRepository},
        Error,
    };

    fn rule(name: &str, enabled: bool) -> ForwardingRule {
        ForwardingRule {
            rule_name: name.to_string(),
            is_enabled: enabled,
            source_channel_id: ChannelId(-1),
            target_channel_ids: vec![ChannelId(-2)],
            filter_options: FilterOptions::default(),
            edit_options: EditOptions::default(),
        }
    }

    /// Counts reads and fails the first `fail_first` of them.
    struct FlakyRepository {
        inner: InMemoryRuleRepository,
        reads: Mutex<u32>,
        fail_first: u32,
    }

    impl FlakyRepository {
        fn new(rules: Vec<ForwardingRule>, fail_first: u32) -> Self {
            Self {
                inner: InMemoryRuleRepository::new(rules),
                reads: Mutex::new(0),
                fail_first,
            }
        }

        fn reads(&self) -> u32 {
            *self.reads.lock().unwrap()
        }
    }

    #[async_trait]
    impl RuleRepository for FlakyRepository {
        async fn get_by_name(&self, name: &str) -> Result<Option<ForwardingRule>> {
            self.inner.get_by_name(name).await
        }
        async fn get_all(&self) -> Result<Vec<ForwardingRule>> {
            self.inner.get_all().await
        }
        async fn get_by_source_channel(&self, source: ChannelId) -> Result<Vec<ForwardingRule>> {
            let n = {
                let mut reads = self.reads.lock().unwrap();
                *reads += 1;
                *reads
            };
            if n <= self.fail_first {
                return Err(Error::RuleStore("db unavailable".into()));
            }
            self.inner.get_by_source_channel(source).await
        }
        async fn add(&self, rule: ForwardingRule) -> Result<()> {
            self.inner.add(rule).await
        }
        async fn update(&self, rule: ForwardingRule) -> Result<()> {
            self.inner.update(rule).await
        }
        async fn delete(&self, name: &str) -> Result<()> {
            self.inner.delete(name).await
        }
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, vec![Duration::from_millis(1)])
    }

    #[tokio::test]
    async fn caches_enabled_rules_and_serves_hits() {
        let repo = Arc::new(FlakyRepository::new(vec![rule("a", true), rule("b", false)], 0));
        let cache = RuleCache::new(repo.clone(), CacheConfig::default(), fast_retry(3));

        let first = cache.get_active_rules(ChannelId(-1)).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].rule_name, "a");
        let _ = cache.get_active_rules(ChannelId(-1)).await.unwrap();
        assert_eq!(repo.reads(), 1);
    }

    #[tokio::test]
    async fn transient_read_failures_are_retried() {
        let repo = Arc::new(FlakyRepository::new(vec![rule("a", true)], 2));
        let cache = RuleCache::new(repo.clone(), CacheConfig::default(), fast_retry(3));
        let rules = cache.get_active_rules(ChannelId(-1)).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(repo.reads(), 3);
    }

    #[tokio::test]
    async fn exhausted_lookup_is_an_error_not_an_empty_set() {
        let repo = Arc::new(FlakyRepository::new(vec![rule("a", true)], 10));
        let cache = RuleCache::new(repo.clone(), CacheConfig::default(), fast_retry(3));
        let err = cache.get_active_rules(ChannelId(-1)).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(repo.reads(), 3);
    }

    #[tokio::test]
    async fn entries_expire_and_refresh() {
        let repo = Arc::new(FlakyRepository::new(vec![rule("a", true)], 0));
        let cfg = CacheConfig {
            ttl: Duration::from_millis(20),
            idle: Duration::from_secs(60),
        };
        let cache = RuleCache::new(repo.clone(), cfg, fast_retry(1));
        cache.get_active_rules(ChannelId(-1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.get_active_rules(ChannelId(-1)).await.unwrap();
        assert_eq!(repo.reads(), 2);
    }

    #[tokio::test]
    async fn idle_entries_expire_while_touched_ones_stay() {
        let repo = Arc::new(FlakyRepository::new(vec![rule("a", true)], 0));
        let cfg = CacheConfig {
            ttl: Duration::from_secs(60),
            idle: Duration::from_millis(30),
        };
        let cache = RuleCache::new(repo.clone(), cfg, fast_retry(1));

        for _ in 0..5 {
            cache.get_active_rules(ChannelId(-1)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(repo.reads(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        cache.get_active_rules(ChannelId(-1)).await.unwrap();
        assert_eq!(repo.reads(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_a_reload() {
        let repo = Arc::new(FlakyRepository::new(vec![rule("a", true)], 0));
        let cache = RuleCache::new(repo.clone(), CacheConfig::default(), fast_retry(1));
        cache.get_active_rules(ChannelId(-1)).await.unwrap();

        repo.add(rule("c", true)).await.unwrap();
        cache.invalidate(ChannelId(-1)).await;

        let rules = cache.get_active_rules(ChannelId(-1)).await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(repo.reads(), 2);
    }
}
