use crate::{domain::MessageId, entities::FormattingSpan};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Audio,
    Animation,
}

/// Opaque handle to media already stored on the platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub file_id: String,
}

impl MediaRef {
    pub fn new(kind: MediaKind, file_id: impl Into<String>) -> Self {
        Self {
            kind,
            file_id: file_id.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaItem {
    pub message_id: MessageId,
    pub media: MediaRef,
    pub caption: String,
    pub entities: Vec<FormattingSpan>,
}

impl MediaItem {
    pub fn new(message_id: MessageId, media: MediaRef) -> Self {
        Self {
            message_id,
            media,
            caption: String::new(),
            entities: Vec::new(),
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>, entities: Vec<FormattingSpan>) -> Self {
        self.caption = caption.into();
        self.entities = entities;
        self
    }

    pub fn clear_caption(&mut self) {
        self.caption.clear();
        self.entities.clear();
    }
}

/// Ordered, non-empty list of media items.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaGroup {
    items: Vec<MediaItem>,
}

impl MediaGroup {
    /// `None` for an empty list.
    pub fn new(items: Vec<MediaItem>) -> Option<Self> {
        (!items.is_empty()).then_some(Self { items })
    }

    pub fn single(item: MediaItem) -> Self {
        Self { items: vec![item] }
    }

    pub fn items(&self) -> &[MediaItem] {
        &self.items
    }

    pub fn first(&self) -> &MediaItem {
        &self.items[0]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Always `false`: a group is never constructed empty.
    pub fn is_empty(&self) -> bool {
        false
    }
}
