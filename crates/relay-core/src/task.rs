use std::{fmt, sync::Arc};

use sha2::{Digest, Sha256};

use crate::{
    domain::{ChannelId, MessageId, SenderPeer},
    entities::FormattingSpan,
    media::MediaGroup,
    rules::ForwardingRule,
};

/// A message observed on a source channel, already converted from the
/// platform's representation. Albums arrive here fully assembled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub source_channel_id: ChannelId,
    pub message_id: MessageId,
    /// Message text, or the album/media caption.
    pub text: String,
    pub spans: Vec<FormattingSpan>,
    pub sender: Option<SenderPeer>,
    pub media_group: Option<MediaGroup>,
}

impl InboundMessage {
    pub fn text(source: ChannelId, id: MessageId, text: impl Into<String>) -> Self {
        Self {
            source_channel_id: source,
            message_id: id,
            text: text.into(),
            spans: Vec::new(),
            sender: None,
            media_group: None,
        }
    }

    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty() || self.media_group.is_some()
    }
}

/// One unit of delivery: a message, a rule, one target channel.
///
/// The rule is a snapshot taken at fan-out; later edits to the rule store do
/// not affect tasks already queued.
#[derive(Clone, Debug)]
pub struct RelayTask {
    pub source_message_id: MessageId,
    pub raw_source_peer_id: i64,
    pub target_channel_id: ChannelId,
    pub rule: Arc<ForwardingRule>,
    pub message_text: String,
    pub message_spans: Vec<FormattingSpan>,
    pub sender: Option<SenderPeer>,
    pub media_group: Option<MediaGroup>,
}

impl RelayTask {
    pub fn new(msg: &InboundMessage, rule: Arc<ForwardingRule>, target: ChannelId) -> Self {
        Self {
            source_message_id: msg.message_id,
            raw_source_peer_id: msg.source_channel_id.0,
            target_channel_id: target,
            rule,
            message_text: msg.text.clone(),
            message_spans: msg.spans.clone(),
            sender: msg.sender,
            media_group: msg.media_group.clone(),
        }
    }

    pub fn has_media(&self) -> bool {
        self.media_group.is_some()
    }

    pub fn had_content(&self) -> bool {
        !self.message_text.trim().is_empty() || self.has_media()
    }

    /// Stable key for "this message, via this rule, to this target".
    pub fn idempotency_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.rule.rule_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.raw_source_peer_id.to_be_bytes());
        hasher.update(self.source_message_id.0.to_be_bytes());
        hasher.update(self.target_channel_id.0.to_be_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for RelayTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{} -> {}",
            self.rule.rule_name,
            self.raw_source_peer_id,
            self.source_message_id.0,
            self.target_channel_id.0
        )
    }
}

/// Lifecycle of a relay task.
///
/// `Created` on enqueue, `PeersResolved` inside an attempt once both peers are
/// known, `FailedTransient` while waiting for the next outer attempt. Every
/// other state is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    Created,
    FilteredOut,
    PeersResolved,
    Delivered,
    /// Already delivered by an earlier run; nothing sent.
    Duplicate,
    FailedTransient,
    Cancelled,
    /// Rejected with an error no retry can fix.
    Failed,
    /// Outer retries exhausted.
    Dead,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            TaskState::Created | TaskState::PeersResolved | TaskState::FailedTransient
        )
    }
}
