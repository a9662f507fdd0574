//! Inbound album assembly.
//!
//! Album items arrive as separate updates sharing a group id. Items are held
//! per (source channel, group id) until no new item has arrived for `timeout`,
//! then emitted as one `InboundMessage` carrying the whole `MediaGroup`.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    domain::{ChannelId, SenderPeer},
    media::{MediaGroup, MediaItem},
    task::InboundMessage,
};

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type EmitFn = Arc<dyn Fn(InboundMessage) -> BoxFuture + Send + Sync>;

type GroupKey = (ChannelId, String);

struct PendingGroup {
    items: Vec<MediaItem>,
    sender: Option<SenderPeer>,
    cancel: CancellationToken,
}

pub struct MediaGroupBuffer {
    timeout: Duration,
    emit: EmitFn,
    pending: tokio::sync::Mutex<HashMap<GroupKey, PendingGroup>>,
}

impl MediaGroupBuffer {
    pub fn new(timeout: Duration, emit: EmitFn) -> Arc<Self> {
        Arc::new(Self {
            timeout,
            emit,
            pending: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Add one album item. Every call restarts the group's timer.
    pub async fn add(
        self: &Arc<Self>,
        source: ChannelId,
        group_id: &str,
        item: MediaItem,
        sender: Option<SenderPeer>,
    ) {
        let key = (source, group_id.to_string());
        let cancel = CancellationToken::new();

        {
            let mut map = self.pending.lock().await;
            match map.get_mut(&key) {
                Some(group) => {
                    group.items.push(item);
                    if group.sender.is_none() {
                        group.sender = sender;
                    }
                    group.cancel.cancel();
                    group.cancel = cancel.clone();
                }
                None => {
                    tracing::debug!(source = source.0, group = group_id, "new media group");
                    map.insert(
                        key.clone(),
                        PendingGroup {
                            items: vec![item],
                            sender,
                            cancel: cancel.clone(),
                        },
                    );
                }
            }
        }

        self.spawn_timer(key, cancel);
    }

    pub async fn pending_groups(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Emit every pending group now.
    pub async fn flush_all(self: &Arc<Self>) {
        let drained: Vec<(GroupKey, PendingGroup)> = {
            let mut map = self.pending.lock().await;
            map.drain().collect()
        };
        for ((source, _), group) in drained {
            group.cancel.cancel();
            if let Some(msg) = assemble(source, group) {
                (self.emit)(msg).await;
            }
        }
    }

    fn spawn_timer(self: &Arc<Self>, key: GroupKey, cancel: CancellationToken) {
        let buffer = Arc::clone(self);
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    buffer.process_group(&key, &cancel).await;
                }
            }
        });
    }

    /// `cancel` is the token of the timer that fired. `add` swaps tokens under
    /// the same lock, so a cancelled token here means a newer timer owns the group.
    async fn process_group(&self, key: &GroupKey, cancel: &CancellationToken) {
        let group = {
            let mut map = self.pending.lock().await;
            if cancel.is_cancelled() {
                return;
            }
            map.remove(key)
        };
        let Some(group) = group else {
            return;
        };
        if let Some(msg) = assemble(key.0, group) {
            tracing::debug!(
                source = key.0 .0,
                group = %key.1,
                items = msg.media_group.as_ref().map_or(0, |g| g.len()),
                "media group complete"
            );
            (self.emit)(msg).await;
        }
    }
}

/// Order items, lift the album caption off its item, and build the message.
fn assemble(source: ChannelId, group: PendingGroup) -> Option<InboundMessage> {
    let mut items = group.items;
    items.sort_by_key(|i| i.message_id);
    items.dedup_by_key(|i| i.message_id);

    let (text, spans) = match items.iter_mut().find(|i| !i.caption.trim().is_empty()) {
        Some(item) => {
            let caption = std::mem::take(&mut item.caption);
            let spans = std::mem::take(&mut item.entities);
            (caption, spans)
        }
        None => (String::new(), Vec::new()),
    };

    let message_id = items.first()?.message_id;
    Some(InboundMessage {
        source_channel_id: source,
        message_id,
        text,
        spans,
        sender: group.sender,
        media_group: MediaGroup::new(items),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        domain::MessageId,
        entities::{FormattingSpan, SpanKind},
        media::{MediaKind, MediaRef},
    };

    fn collector() -> (EmitFn, Arc<Mutex<Vec<InboundMessage>>>) {
        let out = Arc::new(Mutex::new(Vec::new()));
        let sink = out.clone();
        let emit: EmitFn = Arc::new(move |msg: InboundMessage| -> BoxFuture {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().unwrap().push(msg);
            })
        });
        (emit, out)
    }

    fn item(id: i32, caption: &str) -> MediaItem {
        let spans = if caption.is_empty() {
            Vec::new()
        } else {
            vec![FormattingSpan::new(0, 1, SpanKind::Bold)]
        };
        MediaItem::new(MessageId(id), MediaRef::new(MediaKind::Photo, format!("f{id}")))
            .with_caption(caption, spans)
    }

    #[tokio::test]
    async fn assembles_after_quiet_period() {
        let (emit, out) = collector();
        let buf = MediaGroupBuffer::new(Duration::from_millis(30), emit);
        let src = ChannelId(-100);

        buf.add(src, "g1", item(12, ""), None).await;
        buf.add(src, "g1", item(11, "Caption"), None).await;
        buf.add(src, "g1", item(13, ""), None).await;
        assert!(out.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(120)).await;
        let msgs = out.lock().unwrap();
        assert_eq!(msgs.len(), 1);
        let msg = &msgs[0];
        assert_eq!(msg.message_id, MessageId(11));
        assert_eq!(msg.text, "Caption");
        assert_eq!(msg.spans.len(), 1);
        let group = msg.media_group.as_ref().unwrap();
        assert_eq!(
            group.items().iter().map(|i| i.message_id).collect::<Vec<_>>(),
            vec![MessageId(11), MessageId(12), MessageId(13)]
        );
        assert!(group.items().iter().all(|i| i.caption.is_empty()));
    }

    #[tokio::test]
    async fn groups_are_keyed_by_source_and_id() {
        let (emit, out) = collector();
        let buf = MediaGroupBuffer::new(Duration::from_millis(20), emit);

        buf.add(ChannelId(-1), "g", item(1, ""), None).await;
        buf.add(ChannelId(-2), "g", item(1, ""), None).await;
        assert_eq!(buf.pending_groups().await, 2);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(out.lock().unwrap().len(), 2);
        assert_eq!(buf.pending_groups().await, 0);
    }

    #[tokio::test]
    async fn flush_all_emits_immediately() {
        let (emit, out) = collector();
        let buf = MediaGroupBuffer::new(Duration::from_secs(60), emit);
        buf.add(ChannelId(-1), "g", item(5, "x"), None).await;
        buf.add(ChannelId(-1), "g", item(6, ""), None).await;

        buf.flush_all().await;
        let msgs = out.lock().unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].media_group.as_ref().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn superseded_timer_leaves_the_group_alone() {
        let (emit, out) = collector();
        let buf = MediaGroupBuffer::new(Duration::from_secs(60), emit);
        let key = (ChannelId(-1), "g".to_string());

        buf.add(ChannelId(-1), "g", item(1, "x"), None).await;
        let first = buf.pending.lock().await[&key].cancel.clone();
        buf.add(ChannelId(-1), "g", item(2, ""), None).await;
        assert!(first.is_cancelled());

        // The first timer woke just before the second add and now gets the lock.
        buf.process_group(&key, &first).await;
        assert!(out.lock().unwrap().is_empty());
        assert_eq!(buf.pending_groups().await, 1);

        let current = buf.pending.lock().await[&key].cancel.clone();
        buf.process_group(&key, &current).await;
        let msgs = out.lock().unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].media_group.as_ref().unwrap().len(), 2);
    }
}
