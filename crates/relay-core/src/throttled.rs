use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{MessageId, MessageRef, PeerHandle},
    entities::FormattingSpan,
    media::{MediaItem, MediaRef},
    transport::{RawMessage, SendFlags, TransportClient},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between any two platform calls.
    pub global_min_interval: Duration,
    /// Minimum spacing between sends to the same chat.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40), // ~25/sec
            per_chat_min_interval: Duration::from_millis(1050), // ~0.95/sec
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return how long to wait for it.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// `TransportClient` decorator that spaces out outbound calls.
///
/// Best-effort: it keeps the relay under the platform's flood limits in the
/// common case, it does not make rate-limit errors impossible.
pub struct ThrottledTransport {
    inner: Arc<dyn TransportClient>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<HashMap<i64, Arc<Mutex<IntervalLimiter>>>>,
}

impl ThrottledTransport {
    pub fn new(inner: Arc<dyn TransportClient>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_chat: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for_chat(&self, chat_id: i64) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_chat.lock().await;
        map.entry(chat_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_chat_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle_chat(&self, chat_id: i64) {
        let global_wait = { self.global.lock().await.reserve() };
        let chat_wait = {
            let lim = self.limiter_for_chat(chat_id).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(chat_wait);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }

    async fn throttle_global(&self) {
        let wait = { self.global.lock().await.reserve() };
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait]
impl TransportClient for ThrottledTransport {
    async fn resolve_peer(&self, id: i64) -> Result<Option<PeerHandle>> {
        self.throttle_global().await;
        self.inner.resolve_peer(id).await
    }

    async fn send_message(
        &self,
        peer: &PeerHandle,
        text: &str,
        spans: &[FormattingSpan],
        media: Option<&MediaRef>,
        flags: SendFlags,
    ) -> Result<Option<MessageRef>> {
        self.throttle_chat(peer.id).await;
        self.inner
            .send_message(peer, text, spans, media, flags)
            .await
    }

    async fn send_album(
        &self,
        peer: &PeerHandle,
        items: &[MediaItem],
        caption: &str,
        spans: &[FormattingSpan],
        flags: SendFlags,
    ) -> Result<Vec<MessageRef>> {
        self.throttle_chat(peer.id).await;
        self.inner
            .send_album(peer, items, caption, spans, flags)
            .await
    }

    async fn forward_messages(
        &self,
        to: &PeerHandle,
        message_ids: &[MessageId],
        from: &PeerHandle,
        drop_author: bool,
        no_forwards: bool,
    ) -> Result<Vec<MessageRef>> {
        self.throttle_chat(to.id).await;
        self.inner
            .forward_messages(to, message_ids, from, drop_author, no_forwards)
            .await
    }

    async fn get_message_by_id(
        &self,
        peer: &PeerHandle,
        id: MessageId,
    ) -> Result<Option<RawMessage>> {
        self.throttle_global().await;
        self.inner.get_message_by_id(peer, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::PeerKind, transport::fake::FakeTransport};

    fn peer(id: i64) -> PeerHandle {
        PeerHandle {
            id,
            kind: PeerKind::Channel,
            title: None,
        }
    }

    #[tokio::test]
    async fn spaces_sends_to_the_same_chat() {
        let fake = Arc::new(FakeTransport::default());
        let throttled = ThrottledTransport::new(
            fake.clone(),
            ThrottleConfig {
                global_min_interval: Duration::from_millis(0),
                per_chat_min_interval: Duration::from_millis(50),
            },
        );

        let start = Instant::now();
        for _ in 0..3 {
            throttled
                .send_message(&peer(1), "x", &[], None, SendFlags::default())
                .await
                .unwrap();
        }
        // First send is immediate, the next two wait one interval each.
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(fake.outbound().len(), 3);
    }

    #[tokio::test]
    async fn different_chats_do_not_wait_on_each_other() {
        let fake = Arc::new(FakeTransport::default());
        let throttled = ThrottledTransport::new(
            fake.clone(),
            ThrottleConfig {
                global_min_interval: Duration::from_millis(0),
                per_chat_min_interval: Duration::from_secs(5),
            },
        );

        let start = Instant::now();
        for id in 1..=3 {
            throttled
                .send_message(&peer(id), "x", &[], None, SendFlags::default())
                .await
                .unwrap();
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn limiter_reserves_consecutive_slots() {
        let mut lim = IntervalLimiter::new(Duration::from_millis(100));
        assert_eq!(lim.reserve(), Duration::ZERO);
        let second = lim.reserve();
        assert!(second > Duration::from_millis(50) && second <= Duration::from_millis(100));
        let third = lim.reserve();
        assert!(third > second);
    }
}
