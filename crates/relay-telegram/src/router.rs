use std::{sync::Arc, time::Duration};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use relay_core::{
    media_group::{BoxFuture, MediaGroupBuffer},
    orchestrator::RelayOrchestrator,
    task::InboundMessage,
};

use crate::inbound::{self, Inbound};

#[derive(Clone)]
pub struct RelayState {
    pub orchestrator: Arc<RelayOrchestrator>,
    pub albums: Arc<MediaGroupBuffer>,
}

impl RelayState {
    /// Wire the album buffer so completed albums go to the orchestrator.
    pub fn new(orchestrator: Arc<RelayOrchestrator>, media_group_timeout: Duration) -> Self {
        let orch = orchestrator.clone();
        let albums = MediaGroupBuffer::new(
            media_group_timeout,
            Arc::new(move |msg: InboundMessage| -> BoxFuture {
                let orch = orch.clone();
                Box::pin(async move { relay(&orch, msg).await })
            }),
        );
        Self {
            orchestrator,
            albums,
        }
    }
}

async fn relay(orch: &RelayOrchestrator, msg: InboundMessage) {
    let (source, id) = (msg.source_channel_id.0, msg.message_id.0);
    if let Err(e) = orch.handle_inbound(msg).await {
        tracing::error!(source, message = id, error = %e, "failed to fan out message");
    }
}

/// Poll for updates until Ctrl-C. Channel posts and ordinary messages are
/// both treated as relay input.
pub async fn run_polling(bot: Bot, state: Arc<RelayState>) -> anyhow::Result<()> {
    match bot.get_me().await {
        Ok(me) => tracing::info!(bot = %me.username(), "relay bot started"),
        Err(e) => tracing::warn!(error = %e, "get_me failed"),
    }

    let handler = dptree::entry()
        .branch(Update::filter_channel_post().endpoint(handle_post))
        .branch(Update::filter_message().endpoint(handle_post));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_post(msg: Message, state: Arc<RelayState>) -> ResponseResult<()> {
    match inbound::convert(&msg) {
        Inbound::Message(m) => {
            if !m.has_content() {
                tracing::debug!(
                    chat = msg.chat.id.0,
                    message = msg.id.0,
                    "message without text or supported media"
                );
            }
            relay(&state.orchestrator, m).await;
        }
        Inbound::AlbumPart {
            source,
            group_id,
            item,
            sender,
        } => {
            state.albums.add(source, &group_id, item, sender).await;
        }
    }
    Ok(())
}
