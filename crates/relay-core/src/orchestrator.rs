//! Relay orchestration.
//!
//! `RelayOrchestrator` turns one inbound message into independent tasks, one
//! per (matching rule, target channel), and hands them to the job scheduler.
//! `RelayRunner` is what the scheduler calls back for each attempt.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    executor::DeliveryExecutor,
    filter::should_process,
    jobs::{JobHandler, JobId, JobScheduler},
    ledger::DeliveryLedger,
    rules::{cache::RuleCache, ForwardingRule},
    task::{InboundMessage, RelayTask, TaskState},
    Error, Result,
};

/// What fan-out did with one inbound message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FanOut {
    pub jobs: Vec<JobId>,
    pub rules_matched: usize,
    pub filtered_out: usize,
    pub skipped: usize,
}

pub struct RelayOrchestrator {
    rules: Arc<RuleCache>,
    scheduler: Arc<dyn JobScheduler>,
}

impl RelayOrchestrator {
    pub fn new(rules: Arc<RuleCache>, scheduler: Arc<dyn JobScheduler>) -> Self {
        Self { rules, scheduler }
    }

    pub fn rule_cache(&self) -> &Arc<RuleCache> {
        &self.rules
    }

    /// Add a rule and drop the cached rule set of its source.
    pub async fn add_rule(&self, rule: ForwardingRule) -> Result<()> {
        let source = rule.source_channel_id;
        self.rules.repository().add(rule).await?;
        self.rules.invalidate(source).await;
        Ok(())
    }

    /// Replace a rule by name. Both the old and the new source are invalidated.
    pub async fn update_rule(&self, rule: ForwardingRule) -> Result<()> {
        let repo = self.rules.repository();
        let old = repo.get_by_name(&rule.rule_name).await?;
        let source = rule.source_channel_id;
        repo.update(rule).await?;
        if let Some(old) = old {
            self.rules.invalidate(old.source_channel_id).await;
        }
        self.rules.invalidate(source).await;
        Ok(())
    }

    pub async fn delete_rule(&self, name: &str) -> Result<()> {
        let repo = self.rules.repository();
        let old = repo.get_by_name(name).await?;
        repo.delete(name).await?;
        if let Some(old) = old {
            self.rules.invalidate(old.source_channel_id).await;
        }
        Ok(())
    }

    /// Look up rules once, then enqueue one task per matching rule and target.
    ///
    /// A failed rule lookup is returned to the caller; no tasks are created.
    pub async fn handle_inbound(&self, msg: InboundMessage) -> Result<FanOut> {
        let rules = self.rules.get_active_rules(msg.source_channel_id).await?;
        let mut out = FanOut::default();

        for rule in rules.iter() {
            if !rule.is_enabled {
                out.skipped += 1;
                continue;
            }
            if rule.target_channel_ids.is_empty() {
                tracing::warn!(rule = %rule.rule_name, "rule has no target channels, skipping");
                out.skipped += 1;
                continue;
            }
            if !should_process(&msg.text, msg.sender, &rule.filter_options) {
                tracing::debug!(
                    rule = %rule.rule_name,
                    source = msg.source_channel_id.0,
                    message = msg.message_id.0,
                    state = ?TaskState::FilteredOut,
                    "message filtered out"
                );
                out.filtered_out += 1;
                continue;
            }

            out.rules_matched += 1;
            let snapshot = Arc::new(rule.clone());
            for target in &rule.target_channel_ids {
                let task = RelayTask::new(&msg, snapshot.clone(), *target);
                let id = self.scheduler.enqueue(task).await?;
                out.jobs.push(id);
            }
        }

        if !out.jobs.is_empty() {
            tracing::info!(
                source = msg.source_channel_id.0,
                message = msg.message_id.0,
                tasks = out.jobs.len(),
                "message fanned out"
            );
        }
        Ok(out)
    }
}

/// Per-attempt entry point: dedupe, deliver, record.
pub struct RelayRunner {
    executor: DeliveryExecutor,
    ledger: Arc<DeliveryLedger>,
}

impl RelayRunner {
    pub fn new(executor: DeliveryExecutor, ledger: Arc<DeliveryLedger>) -> Self {
        Self { executor, ledger }
    }

    pub async fn execute(&self, task: &RelayTask, cancel: &CancellationToken) -> Result<TaskState> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let key = task.idempotency_key();
        if self.ledger.contains(&key) {
            tracing::info!(task = %task, "already delivered, skipping");
            return Ok(TaskState::Duplicate);
        }

        match self.executor.deliver(task, cancel).await {
            Ok(sent) => {
                self.ledger.record(key);
                tracing::info!(task = %task, messages = sent.len(), "relay task delivered");
                Ok(TaskState::Delivered)
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                tracing::warn!(task = %task, error = %e, "relay task attempt failed");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl JobHandler for RelayRunner {
    async fn run(&self, task: &RelayTask, cancel: CancellationToken) -> Result<TaskState> {
        self.execute(task, &cancel).await
    }
}
