//! Send-strategy selection.
//!
//! A rule that leaves content untouched is served by the platform's native
//! forward. Anything that edits content, or carries media, is re-composed and
//! sent as a new message, a single media message or an album.

use crate::{
    domain::MessageId,
    entities::FormattingSpan,
    media::{MediaItem, MediaRef},
    rules::ForwardingRule,
    task::RelayTask,
    transform::{apply_edits, Transformed},
    transport::SendFlags,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendPlan {
    /// Relay the original unmodified.
    Forward {
        message_ids: Vec<MessageId>,
        drop_author: bool,
        no_forwards: bool,
    },
    Text {
        text: String,
        spans: Vec<FormattingSpan>,
        flags: SendFlags,
    },
    SingleMedia {
        media: MediaRef,
        caption: String,
        spans: Vec<FormattingSpan>,
        flags: SendFlags,
    },
    /// `caption`/`spans` belong to the first item; `items[0]` carries none.
    Album {
        items: Vec<MediaItem>,
        caption: String,
        spans: Vec<FormattingSpan>,
        flags: SendFlags,
    },
    /// Edits emptied a message that had content.
    Placeholder { text: String, flags: SendFlags },
    Nothing,
}

impl SendPlan {
    pub fn name(&self) -> &'static str {
        match self {
            SendPlan::Forward { .. } => "forward",
            SendPlan::Text { .. } => "text",
            SendPlan::SingleMedia { .. } => "media",
            SendPlan::Album { .. } => "album",
            SendPlan::Placeholder { .. } => "placeholder",
            SendPlan::Nothing => "nothing",
        }
    }
}

/// Whether the task must be re-composed instead of natively forwarded.
pub fn needs_custom_send(rule: &ForwardingRule, has_media: bool) -> bool {
    rule.edit_options.alters_content() || has_media
}

pub fn plan(task: &RelayTask, placeholder: &str) -> SendPlan {
    let opts = &task.rule.edit_options;

    if !needs_custom_send(&task.rule, task.has_media()) {
        return SendPlan::Forward {
            message_ids: vec![task.source_message_id],
            drop_author: opts.remove_source_forward_header,
            no_forwards: opts.no_forwards,
        };
    }

    let flags = SendFlags {
        no_forwards: opts.no_forwards,
        silent: false,
    };
    let drop_captions = opts.drop_media_captions && task.has_media();
    let Transformed { text, spans } = if drop_captions {
        Transformed::default()
    } else {
        apply_edits(&task.message_text, &task.message_spans, opts)
    };

    match &task.media_group {
        None if !text.trim().is_empty() => SendPlan::Text { text, spans, flags },
        None if task.had_content() => SendPlan::Placeholder {
            text: placeholder.to_string(),
            flags,
        },
        None => SendPlan::Nothing,
        Some(group) if group.len() == 1 => SendPlan::SingleMedia {
            media: group.first().media.clone(),
            caption: text,
            spans,
            flags,
        },
        Some(group) => {
            let mut items = group.items().to_vec();
            for (i, item) in items.iter_mut().enumerate() {
                if i == 0 || drop_captions {
                    item.clear_caption();
                }
            }
            SendPlan::Album {
                items,
                caption: text,
                spans,
                flags,
            }
        }
    }
}
