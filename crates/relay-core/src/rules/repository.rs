use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    domain::ChannelId,
    rules::{ForwardingRule, RuleRepository},
    Error, Result,
};

/// Rule store held in memory, optionally backed by a JSON file.
///
/// When created from a file every mutation is written back to it. A mutation
/// whose write fails leaves the in-memory rules unchanged.
pub struct InMemoryRuleRepository {
    rules: RwLock<Vec<ForwardingRule>>,
    path: Option<PathBuf>,
}

impl InMemoryRuleRepository {
    pub fn new(rules: Vec<ForwardingRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
            path: None,
        }
    }

    /// Parse a JSON array of rules.
    pub fn load_json(raw: &str) -> Result<Vec<ForwardingRule>> {
        let rules: Vec<ForwardingRule> = serde_json::from_str(raw)?;
        let mut seen = std::collections::HashSet::new();
        for rule in &rules {
            rule.validate()?;
            if !seen.insert(rule.rule_name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate rule name: {}",
                    rule.rule_name
                )));
            }
        }
        Ok(rules)
    }

    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let rules = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Self::load_json(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "rules file not found, starting empty");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!(path = %path.display(), count = rules.len(), "loaded forwarding rules");
        Ok(Self {
            rules: RwLock::new(rules),
            path: Some(path),
        })
    }

    async fn persist(&self, rules: &[ForwardingRule]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(rules)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn get_by_name(&self, name: &str) -> Result<Option<ForwardingRule>> {
        let rules = self.rules.read().await;
        Ok(rules.iter().find(|r| r.rule_name == name).cloned())
    }

    async fn get_all(&self) -> Result<Vec<ForwardingRule>> {
        Ok(self.rules.read().await.clone())
    }

    async fn get_by_source_channel(&self, source: ChannelId) -> Result<Vec<ForwardingRule>> {
        let rules = self.rules.read().await;
        Ok(rules
            .iter()
            .filter(|r| r.source_channel_id == source)
            .cloned()
            .collect())
    }

    async fn add(&self, rule: ForwardingRule) -> Result<()> {
        rule.validate()?;
        let mut rules = self.rules.write().await;
        if rules.iter().any(|r| r.rule_name == rule.rule_name) {
            return Err(Error::Config(format!(
                "rule already exists: {}",
                rule.rule_name
            )));
        }
        let mut next = rules.clone();
        next.push(rule);
        self.persist(&next).await?;
        *rules = next;
        Ok(())
    }

    async fn update(&self, rule: ForwardingRule) -> Result<()> {
        rule.validate()?;
        let mut rules = self.rules.write().await;
        let mut next = rules.clone();
        let Some(slot) = next.iter_mut().find(|r| r.rule_name == rule.rule_name) else {
            return Err(Error::Config(format!("unknown rule: {}", rule.rule_name)));
        };
        *slot = rule;
        self.persist(&next).await?;
        *rules = next;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut rules = self.rules.write().await;
        let next: Vec<ForwardingRule> = rules
            .iter()
            .filter(|r| r.rule_name != name)
            .cloned()
            .collect();
        if next.len() == rules.len() {
            return Err(Error::Config(format!("unknown rule: {name}")));
        }
        self.persist(&next).await?;
        *rules = next;
        Ok(())
    }
}
