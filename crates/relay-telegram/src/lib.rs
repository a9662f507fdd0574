//! Telegram adapter (teloxide).
//!
//! This crate implements the `relay-core` `TransportClient` over the Telegram
//! Bot API and feeds inbound channel posts into the relay orchestrator.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{
        InputFile, InputMedia, InputMediaAudio, InputMediaDocument, InputMediaPhoto,
        InputMediaVideo,
    },
    ApiError, RequestError,
};

pub mod entities;
pub mod inbound;
pub mod router;

use relay_core::{
    domain::{ChannelId, MessageId, MessageRef, PeerHandle, PeerKind},
    entities::FormattingSpan,
    media::{MediaItem, MediaKind, MediaRef},
    transport::{RawMessage, SendFlags, TransportClient},
    Error, Result,
};

use crate::entities::to_telegram;

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn from_token(token: impl Into<String>) -> Self {
        Self::new(Bot::new(token))
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(id: i64) -> teloxide::types::ChatId {
        teloxide::types::ChatId(id)
    }

    fn tg_msg_id(id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(id.0)
    }

    fn sent(peer: &PeerHandle, msg: &Message) -> MessageRef {
        MessageRef {
            channel_id: ChannelId(peer.id),
            message_id: MessageId(msg.id.0),
        }
    }
}

/// Map a Bot API failure onto the relay's error taxonomy.
pub fn map_request_error(e: RequestError, peer: i64) -> Error {
    match e {
        RequestError::RetryAfter(wait) => Error::RateLimited {
            retry_after: wait.duration(),
        },
        RequestError::Api(ApiError::ChatNotFound) => Error::PeerUnresolved(peer),
        RequestError::Api(api) => Error::Platform(api.to_string()),
        RequestError::MigrateToChatId(new_id) => {
            Error::Platform(format!("chat {peer} migrated to {}", new_id.0))
        }
        RequestError::Network(e) => Error::Transport(e.to_string()),
        RequestError::Io(e) => Error::Transport(e.to_string()),
        other => Error::Transport(other.to_string()),
    }
}

macro_rules! send_with_caption {
    ($req:expr, $caption:expr, $entities:expr, $flags:expr) => {{
        let mut req = $req
            .protect_content($flags.no_forwards)
            .disable_notification($flags.silent);
        if !$caption.is_empty() {
            req = req.caption($caption.to_string()).caption_entities($entities);
        }
        req.await
    }};
}

#[async_trait]
impl TransportClient for TelegramTransport {
    async fn resolve_peer(&self, id: i64) -> Result<Option<PeerHandle>> {
        match self.bot.get_chat(Self::tg_chat(id)).await {
            Ok(chat) => {
                let kind = if chat.is_private() {
                    PeerKind::User
                } else if chat.is_channel() {
                    PeerKind::Channel
                } else {
                    PeerKind::Chat
                };
                Ok(Some(PeerHandle {
                    id: chat.id.0,
                    kind,
                    title: chat.title().map(str::to_string),
                }))
            }
            Err(RequestError::Api(ApiError::ChatNotFound)) => Ok(None),
            Err(e) => Err(map_request_error(e, id)),
        }
    }

    async fn send_message(
        &self,
        peer: &PeerHandle,
        text: &str,
        spans: &[FormattingSpan],
        media: Option<&MediaRef>,
        flags: SendFlags,
    ) -> Result<Option<MessageRef>> {
        let chat = Self::tg_chat(peer.id);
        let entities = to_telegram(spans, text);

        let res = match media {
            None => {
                self.bot
                    .send_message(chat, text.to_string())
                    .entities(entities)
                    .protect_content(flags.no_forwards)
                    .disable_notification(flags.silent)
                    .await
            }
            Some(m) => {
                let file = InputFile::file_id(m.file_id.clone());
                match m.kind {
                    MediaKind::Photo => {
                        send_with_caption!(self.bot.send_photo(chat, file), text, entities, flags)
                    }
                    MediaKind::Video => {
                        send_with_caption!(self.bot.send_video(chat, file), text, entities, flags)
                    }
                    MediaKind::Document => send_with_caption!(
                        self.bot.send_document(chat, file),
                        text,
                        entities,
                        flags
                    ),
                    MediaKind::Audio => {
                        send_with_caption!(self.bot.send_audio(chat, file), text, entities, flags)
                    }
                    MediaKind::Animation => send_with_caption!(
                        self.bot.send_animation(chat, file),
                        text,
                        entities,
                        flags
                    ),
                }
            }
        };

        let msg = res.map_err(|e| map_request_error(e, peer.id))?;
        Ok(Some(Self::sent(peer, &msg)))
    }

    async fn send_album(
        &self,
        peer: &PeerHandle,
        items: &[MediaItem],
        caption: &str,
        spans: &[FormattingSpan],
        flags: SendFlags,
    ) -> Result<Vec<MessageRef>> {
        let media: Vec<InputMedia> = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let (text, spans) = if i == 0 {
                    (caption, spans)
                } else {
                    (item.caption.as_str(), item.entities.as_slice())
                };
                album_item(&item.media, text, to_telegram(spans, text))
            })
            .collect();

        let msgs = self
            .bot
            .send_media_group(Self::tg_chat(peer.id), media)
            .protect_content(flags.no_forwards)
            .disable_notification(flags.silent)
            .await
            .map_err(|e| map_request_error(e, peer.id))?;
        Ok(msgs.iter().map(|m| Self::sent(peer, m)).collect())
    }

    async fn forward_messages(
        &self,
        to: &PeerHandle,
        message_ids: &[MessageId],
        from: &PeerHandle,
        drop_author: bool,
        no_forwards: bool,
    ) -> Result<Vec<MessageRef>> {
        let mut out = Vec::with_capacity(message_ids.len());
        for id in message_ids {
            let sent = if drop_author {
                self.bot
                    .copy_message(
                        Self::tg_chat(to.id),
                        Self::tg_chat(from.id),
                        Self::tg_msg_id(*id),
                    )
                    .protect_content(no_forwards)
                    .await
                    .map(|m| m.0)
            } else {
                self.bot
                    .forward_message(
                        Self::tg_chat(to.id),
                        Self::tg_chat(from.id),
                        Self::tg_msg_id(*id),
                    )
                    .protect_content(no_forwards)
                    .await
                    .map(|m| m.id.0)
            };
            let sent = sent.map_err(|e| map_request_error(e, to.id))?;
            out.push(MessageRef {
                channel_id: ChannelId(to.id),
                message_id: MessageId(sent),
            });
        }
        Ok(out)
    }

    async fn get_message_by_id(
        &self,
        peer: &PeerHandle,
        id: MessageId,
    ) -> Result<Option<RawMessage>> {
        // The Bot API has no fetch-by-id.
        tracing::debug!(peer = peer.id, message = id.0, "get_message_by_id unsupported");
        Ok(None)
    }
}

fn album_item(
    media: &MediaRef,
    caption: &str,
    entities: Vec<teloxide::types::MessageEntity>,
) -> InputMedia {
    let file = InputFile::file_id(media.file_id.clone());
    let caption = (!caption.is_empty()).then(|| caption.to_string());
    let entities = caption.as_ref().map(|_| entities);

    macro_rules! with_caption {
        ($m:expr) => {{
            let mut m = $m;
            if let (Some(c), Some(e)) = (caption, entities) {
                m = m.caption(c).caption_entities(e);
            }
            m
        }};
    }

    match media.kind {
        MediaKind::Photo => InputMedia::Photo(with_caption!(InputMediaPhoto::new(file))),
        MediaKind::Video => InputMedia::Video(with_caption!(InputMediaVideo::new(file))),
        MediaKind::Audio => InputMedia::Audio(with_caption!(InputMediaAudio::new(file))),
        // Animations cannot be grouped; send them as documents.
        MediaKind::Document | MediaKind::Animation => {
            InputMedia::Document(with_caption!(InputMediaDocument::new(file)))
        }
    }
}
