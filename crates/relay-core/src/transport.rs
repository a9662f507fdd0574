use async_trait::async_trait;

use crate::{
    domain::{MessageId, MessageRef, PeerHandle},
    entities::FormattingSpan,
    media::{MediaItem, MediaRef},
    Result,
};

/// Per-send options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendFlags {
    /// Recipients may not forward or save the message.
    pub no_forwards: bool,
    pub silent: bool,
}

/// A message fetched back from the platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage {
    pub id: MessageRef,
    pub text: String,
    pub spans: Vec<FormattingSpan>,
    pub media: Option<MediaRef>,
}

/// Chat platform client port.
///
/// Every call may fail with `Error::RateLimited`. An `Ok(None)` / empty vec
/// means the platform accepted the call but returned nothing usable.
#[async_trait]
pub trait TransportClient: Send + Sync {
    async fn resolve_peer(&self, id: i64) -> Result<Option<PeerHandle>>;

    async fn send_message(
        &self,
        peer: &PeerHandle,
        text: &str,
        spans: &[FormattingSpan],
        media: Option<&MediaRef>,
        flags: SendFlags,
    ) -> Result<Option<MessageRef>>;

    /// Send an album. `caption`/`spans` go on the first item; later items keep
    /// their own captions.
    async fn send_album(
        &self,
        peer: &PeerHandle,
        items: &[MediaItem],
        caption: &str,
        spans: &[FormattingSpan],
        flags: SendFlags,
    ) -> Result<Vec<MessageRef>>;

    async fn forward_messages(
        &self,
        to: &PeerHandle,
        message_ids: &[MessageId],
        from: &PeerHandle,
        drop_author: bool,
        no_forwards: bool,
    ) -> Result<Vec<MessageRef>>;

    async fn get_message_by_id(&self, peer: &PeerHandle, id: MessageId)
        -> Result<Option<RawMessage>>;
}
