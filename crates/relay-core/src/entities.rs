//! Formatting spans (a.k.a. message entities).
//!
//! Offsets and lengths are measured in UTF-16 code units, which is what the
//! chat platform uses on the wire.

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpanKind {
    Bold,
    Italic,
    Underline,
    Strike,
    Spoiler,
    Code,
    Pre { language: Option<String> },
    Url,
    TextUrl { url: String },
    MentionName { user_id: i64 },
    CustomEmoji { document_id: String },
    Blockquote,
    Hashtag,
    Cashtag,
    Mention,
    Email,
    Phone,
    BotCommand,
    /// Anything the adapter could not classify. Only the range survives.
    Unknown,
}

impl SpanKind {
    pub fn is_link(&self) -> bool {
        matches!(self, SpanKind::Url | SpanKind::TextUrl { .. })
    }

    pub fn is_custom_emoji(&self) -> bool {
        matches!(self, SpanKind::CustomEmoji { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormattingSpan {
    pub offset: usize,
    pub length: usize,
    pub kind: SpanKind,
}

impl FormattingSpan {
    pub fn new(offset: usize, length: usize, kind: SpanKind) -> Self {
        Self {
            offset,
            length,
            kind,
        }
    }

    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    /// Same kind/payload at a new position.
    pub fn moved(&self, offset: usize, length: usize) -> Self {
        Self {
            offset,
            length,
            kind: self.kind.clone(),
        }
    }

    pub fn fits(&self, text_len: usize) -> bool {
        self.length > 0 && self.end() <= text_len
    }
}

/// Drop every span that falls outside `text_len` (or is empty).
pub fn sanitize(spans: Vec<FormattingSpan>, text_len: usize) -> Vec<FormattingSpan> {
    let before = spans.len();
    let kept: Vec<FormattingSpan> = spans.into_iter().filter(|s| s.fits(text_len)).collect();
    if kept.len() != before {
        tracing::debug!(
            dropped = before - kept.len(),
            text_len,
            "dropped out-of-bounds formatting spans"
        );
    }
    kept
}
