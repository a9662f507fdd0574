//! Inbound update conversion.

use teloxide::types::Message;

use relay_core::{
    domain::{ChannelId, MessageId, SenderPeer, UserId},
    media::{MediaGroup, MediaItem, MediaKind, MediaRef},
    task::InboundMessage,
};

use crate::entities::from_telegram;

/// What to do with one Telegram message.
#[derive(Debug)]
pub enum Inbound {
    Message(InboundMessage),
    /// One item of an album; the rest arrive as separate updates.
    AlbumPart {
        source: ChannelId,
        group_id: String,
        item: MediaItem,
        sender: Option<SenderPeer>,
    },
}

pub fn convert(msg: &Message) -> Inbound {
    let source = ChannelId(msg.chat.id.0);
    let id = MessageId(msg.id.0);
    let sender = sender_of(msg);

    let (text, entities) = match (msg.text(), msg.caption()) {
        (Some(t), _) => (t.to_string(), msg.entities().unwrap_or_default()),
        (None, Some(c)) => (c.to_string(), msg.caption_entities().unwrap_or_default()),
        (None, None) => (String::new(), &[][..]),
    };
    let spans = from_telegram(entities);

    let media = media_of(msg);
    if let (Some(media), Some(group_id)) = (&media, msg.media_group_id()) {
        return Inbound::AlbumPart {
            source,
            group_id: group_id.to_string(),
            item: MediaItem::new(id, media.clone()).with_caption(text, spans),
            sender,
        };
    }

    let media_group = media.map(|m| MediaGroup::single(MediaItem::new(id, m)));
    Inbound::Message(InboundMessage {
        source_channel_id: source,
        message_id: id,
        text,
        spans,
        sender,
        media_group,
    })
}

fn sender_of(msg: &Message) -> Option<SenderPeer> {
    if let Some(chat) = &msg.sender_chat {
        let id = ChannelId(chat.id.0);
        return Some(if chat.is_channel() {
            SenderPeer::Channel(id)
        } else {
            SenderPeer::Chat(id)
        });
    }
    msg.from
        .as_ref()
        .map(|u| SenderPeer::User(UserId(u.id.0 as i64)))
}

fn media_of(msg: &Message) -> Option<MediaRef> {
    if let Some(sizes) = msg.photo() {
        // Largest size last.
        return sizes
            .last()
            .map(|p| MediaRef::new(MediaKind::Photo, p.file.id.clone()));
    }
    if let Some(v) = msg.video() {
        return Some(MediaRef::new(MediaKind::Video, v.file.id.clone()));
    }
    if let Some(a) = msg.animation() {
        return Some(MediaRef::new(MediaKind::Animation, a.file.id.clone()));
    }
    if let Some(a) = msg.audio() {
        return Some(MediaRef::new(MediaKind::Audio, a.file.id.clone()));
    }
    if let Some(d) = msg.document() {
        return Some(MediaRef::new(MediaKind::Document, d.file.id.clone()));
    }
    None
}
