//! Conversion between Telegram message entities and `FormattingSpan`s.
//!
//! Both sides count offsets in UTF-16 code units, so positions carry over
//! unchanged.

use teloxide::types::{MessageEntity, MessageEntityKind};
use url::Url;

use relay_core::entities::{FormattingSpan, SpanKind};

pub fn from_telegram(entities: &[MessageEntity]) -> Vec<FormattingSpan> {
    entities
        .iter()
        .map(|e| FormattingSpan::new(e.offset, e.length, span_kind(&e.kind)))
        .collect()
}

fn span_kind(kind: &MessageEntityKind) -> SpanKind {
    use MessageEntityKind as K;
    match kind {
        K::Bold => SpanKind::Bold,
        K::Italic => SpanKind::Italic,
        K::Underline => SpanKind::Underline,
        K::Strikethrough => SpanKind::Strike,
        K::Spoiler => SpanKind::Spoiler,
        K::Code => SpanKind::Code,
        K::Pre { language } => SpanKind::Pre {
            language: language.clone(),
        },
        K::Url => SpanKind::Url,
        K::TextLink { url } => SpanKind::TextUrl {
            url: url.to_string(),
        },
        K::TextMention { user } => SpanKind::MentionName {
            user_id: user.id.0 as i64,
        },
        K::CustomEmoji { custom_emoji_id } => SpanKind::CustomEmoji {
            document_id: custom_emoji_id.clone(),
        },
        K::Blockquote => SpanKind::Blockquote,
        K::Hashtag => SpanKind::Hashtag,
        K::Cashtag => SpanKind::Cashtag,
        K::Mention => SpanKind::Mention,
        K::Email => SpanKind::Email,
        K::PhoneNumber => SpanKind::Phone,
        K::BotCommand => SpanKind::BotCommand,
        #[allow(unreachable_patterns)]
        _ => SpanKind::Unknown,
    }
}

/// Spans the Bot API can carry. Custom emoji and unknown kinds are dropped;
/// so are spans that do not fit `text`.
pub fn to_telegram(spans: &[FormattingSpan], text: &str) -> Vec<MessageEntity> {
    let len = text.encode_utf16().count();
    spans
        .iter()
        .filter(|s| s.fits(len))
        .filter_map(|s| {
            let kind = match &s.kind {
                SpanKind::Bold => MessageEntityKind::Bold,
                SpanKind::Italic => MessageEntityKind::Italic,
                SpanKind::Underline => MessageEntityKind::Underline,
                SpanKind::Strike => MessageEntityKind::Strikethrough,
                SpanKind::Spoiler => MessageEntityKind::Spoiler,
                SpanKind::Code => MessageEntityKind::Code,
                SpanKind::Pre { language } => MessageEntityKind::Pre {
                    language: language.clone(),
                },
                SpanKind::Url => MessageEntityKind::Url,
                SpanKind::TextUrl { url } => MessageEntityKind::TextLink {
                    url: parse_url(url)?,
                },
                SpanKind::MentionName { user_id } => MessageEntityKind::TextLink {
                    url: parse_url(&format!("tg://user?id={user_id}"))?,
                },
                SpanKind::Blockquote => MessageEntityKind::Blockquote,
                SpanKind::Hashtag => MessageEntityKind::Hashtag,
                SpanKind::Cashtag => MessageEntityKind::Cashtag,
                SpanKind::Mention => MessageEntityKind::Mention,
                SpanKind::Email => MessageEntityKind::Email,
                SpanKind::Phone => MessageEntityKind::PhoneNumber,
                SpanKind::BotCommand => MessageEntityKind::BotCommand,
                SpanKind::CustomEmoji { .. } | SpanKind::Unknown => return None,
            };
            Some(MessageEntity::new(kind, s.offset, s.length))
        })
        .collect()
}

fn parse_url(raw: &str) -> Option<Url> {
    match Url::parse(raw) {
        Ok(u) => Some(u),
        Err(e) => {
            tracing::warn!(url = raw, error = %e, "dropping link span with invalid url");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_kinds_map_with_offsets() {
        let url = Url::parse("https://example.com/x").unwrap();
        let ents = vec![
            MessageEntity::new(MessageEntityKind::Bold, 0, 4),
            MessageEntity::new(MessageEntityKind::TextLink { url }, 5, 3),
            MessageEntity::new(MessageEntityKind::Strikethrough, 9, 2),
        ];
        let spans = from_telegram(&ents);
        assert_eq!(spans[0], FormattingSpan::new(0, 4, SpanKind::Bold));
        assert_eq!(
            spans[1],
            FormattingSpan::new(
                5,
                3,
                SpanKind::TextUrl {
                    url: "https://example.com/x".into()
                }
            )
        );
        assert_eq!(spans[2].kind, SpanKind::Strike);
    }

    #[test]
    fn outbound_drops_unsendable_spans() {
        let spans = vec![
            FormattingSpan::new(0, 2, SpanKind::Italic),
            FormattingSpan::new(
                2,
                2,
                SpanKind::CustomEmoji {
                    document_id: "1".into(),
                },
            ),
            FormattingSpan::new(0, 1, SpanKind::Unknown),
            FormattingSpan::new(3, 10, SpanKind::Bold),
            FormattingSpan::new(
                0,
                4,
                SpanKind::TextUrl {
                    url: "not a url".into(),
                },
            ),
        ];
        let ents = to_telegram(&spans, "abcd");
        assert_eq!(ents, vec![MessageEntity::new(MessageEntityKind::Italic, 0, 2)]);
    }

    #[test]
    fn mention_by_id_becomes_user_link() {
        let spans = vec![FormattingSpan::new(0, 3, SpanKind::MentionName { user_id: 42 })];
        let ents = to_telegram(&spans, "Bob");
        match &ents[0].kind {
            MessageEntityKind::TextLink { url } => assert_eq!(url.as_str(), "tg://user?id=42"),
            other => panic!("unexpected kind {other:?}"),
        }
    }
}
