use std::{sync::Arc, time::Duration};

use relay_core::{
    config::Config,
    executor::DeliveryExecutor,
    jobs::{JobScheduler, LocalJobQueue},
    ledger::{DeliveryLedger, DEFAULT_LEDGER_CAPACITY},
    orchestrator::{RelayOrchestrator, RelayRunner},
    rules::{cache::RuleCache, InMemoryRuleRepository, RuleRepository},
    throttled::{ThrottleConfig, ThrottledTransport},
    transport::TransportClient,
};
use relay_telegram::{
    router::{run_polling, RelayState},
    TelegramTransport,
};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), relay_core::Error> {
    relay_core::logging::init("relay")?;

    let cfg = Config::load()?;

    let repo = InMemoryRuleRepository::from_json_file(&cfg.rules_file).await?;
    let repo: Arc<dyn RuleRepository> = Arc::new(repo);
    let rules = Arc::new(RuleCache::new(
        repo,
        cfg.relay.cache_config(),
        cfg.relay.inline_retry(),
    ));

    let telegram = TelegramTransport::from_token(cfg.telegram_bot_token.clone());
    let bot = telegram.bot();
    let transport: Arc<dyn TransportClient> = Arc::new(ThrottledTransport::new(
        Arc::new(telegram),
        ThrottleConfig {
            global_min_interval: cfg.throttle_global,
            per_chat_min_interval: cfg.throttle_per_chat,
        },
    ));

    let executor = DeliveryExecutor::new(transport, cfg.relay.inline_retry())
        .with_placeholder(cfg.placeholder_text.clone());
    let ledger = Arc::new(DeliveryLedger::new(DEFAULT_LEDGER_CAPACITY));
    let runner = Arc::new(RelayRunner::new(executor, ledger));

    let queue = LocalJobQueue::start(runner, cfg.relay.outer_retry(), cfg.workers).await;
    let scheduler: Arc<dyn JobScheduler> = Arc::new(queue.clone());
    let orchestrator = Arc::new(RelayOrchestrator::new(rules, scheduler));

    let state = Arc::new(RelayState::new(orchestrator, cfg.media_group_timeout));

    tracing::info!(
        rules_file = %cfg.rules_file.display(),
        workers = cfg.workers,
        "relay starting"
    );

    run_polling(bot, state.clone())
        .await
        .map_err(|e| relay_core::Error::External(format!("telegram bot failed: {e}")))?;

    // Albums still waiting on their timer are relayed before the queue drains.
    state.albums.flush_all().await;
    if tokio::time::timeout(DRAIN_TIMEOUT, queue.wait_idle())
        .await
        .is_err()
    {
        tracing::warn!("queue did not drain in time, cancelling remaining jobs");
    }
    queue.shutdown().await;

    let stats = queue.stats().await;
    tracing::info!(?stats, "relay stopped");
    for dead in queue.dead_tasks().await {
        tracing::warn!(
            job = dead.job_id,
            rule = %dead.rule_name,
            source = dead.source_channel_id.0,
            message = dead.source_message_id.0,
            target = dead.target_channel_id.0,
            attempts = dead.attempts,
            error = %dead.last_error,
            failed_at = %dead.failed_at,
            "undelivered task"
        );
    }

    Ok(())
}
