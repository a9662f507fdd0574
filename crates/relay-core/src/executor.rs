//! Delivery executor: resolve peers, then issue exactly one platform call.
//!
//! Each call category runs under its own inline retry. A `None`/empty result
//! is retried like a transient error; a rate-limit signal is not retried here.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    config::DEFAULT_PLACEHOLDER_TEXT,
    dispatch::{self, SendPlan},
    domain::{MessageRef, PeerHandle},
    retry::RetryPolicy,
    task::{RelayTask, TaskState},
    transport::TransportClient,
    Error, Result,
};

pub struct DeliveryExecutor {
    transport: Arc<dyn TransportClient>,
    retry: RetryPolicy,
    placeholder: String,
}

impl DeliveryExecutor {
    pub fn new(transport: Arc<dyn TransportClient>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            retry,
            placeholder: DEFAULT_PLACEHOLDER_TEXT.to_string(),
        }
    }

    pub fn with_placeholder(mut self, text: impl Into<String>) -> Self {
        self.placeholder = text.into();
        self
    }

    /// Deliver one task. Returns the messages created on the target.
    pub async fn deliver(
        &self,
        task: &RelayTask,
        cancel: &CancellationToken,
    ) -> Result<Vec<MessageRef>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let source = self.resolve(task.raw_source_peer_id, cancel).await?;
        let target = self.resolve(task.target_channel_id.0, cancel).await?;

        let plan = dispatch::plan(task, &self.placeholder);
        tracing::debug!(
            task = %task,
            state = ?TaskState::PeersResolved,
            plan = plan.name(),
            "send plan chosen"
        );

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.execute(&plan, &source, &target, cancel).await
    }

    async fn resolve(&self, id: i64, cancel: &CancellationToken) -> Result<PeerHandle> {
        let found = self
            .retry
            .run("resolve peer", cancel, || async move {
                self.transport
                    .resolve_peer(id)
                    .await?
                    .ok_or(Error::EmptyResult("resolve peer"))
            })
            .await;
        match found {
            Err(Error::EmptyResult(_)) => Err(Error::PeerUnresolved(id)),
            other => other,
        }
    }

    async fn execute(
        &self,
        plan: &SendPlan,
        source: &PeerHandle,
        target: &PeerHandle,
        cancel: &CancellationToken,
    ) -> Result<Vec<MessageRef>> {
        let t = &self.transport;
        match plan {
            SendPlan::Nothing => Ok(Vec::new()),
            SendPlan::Forward {
                message_ids,
                drop_author,
                no_forwards,
            } => {
                self.retry
                    .run("forward messages", cancel, || async move {
                        non_empty(
                            t.forward_messages(
                                target,
                                message_ids,
                                source,
                                *drop_author,
                                *no_forwards,
                            )
                            .await?,
                            "forward messages",
                        )
                    })
                    .await
            }
            SendPlan::Text { text, spans, flags } => {
                self.retry
                    .run("send message", cancel, || async move {
                        let sent = t.send_message(target, text, spans, None, *flags).await?;
                        non_empty(sent.into_iter().collect(), "send message")
                    })
                    .await
            }
            SendPlan::Placeholder { text, flags } => {
                self.retry
                    .run("send message", cancel, || async move {
                        let sent = t.send_message(target, text, &[], None, *flags).await?;
                        non_empty(sent.into_iter().collect(), "send message")
                    })
                    .await
            }
            SendPlan::SingleMedia {
                media,
                caption,
                spans,
                flags,
            } => {
                self.retry
                    .run("send message", cancel, || async move {
                        let sent = t
                            .send_message(target, caption, spans, Some(media), *flags)
                            .await?;
                        non_empty(sent.into_iter().collect(), "send message")
                    })
                    .await
            }
            SendPlan::Album {
                items,
                caption,
                spans,
                flags,
            } => {
                self.retry
                    .run("send album", cancel, || async move {
                        non_empty(
                            t.send_album(target, items, caption, spans, *flags).await?,
                            "send album",
                        )
                    })
                    .await
            }
        }
    }
}

fn non_empty(sent: Vec<MessageRef>, operation: &'static str) -> Result<Vec<MessageRef>> {
    if sent.is_empty() {
        Err(Error::EmptyResult(operation))
    } else {
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        domain::{ChannelId, MessageId},
        entities::{FormattingSpan, SpanKind},
        media::{MediaGroup, MediaItem, MediaKind, MediaRef},
        rules::{EditOptions, ForwardingRule},
        task::InboundMessage,
        transport::{
            fake::{Call, FakeTransport},
            SendFlags,
        },
    };

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(5, vec![Duration::from_millis(1)])
    }

    fn task(edit: EditOptions) -> RelayTask {
        let rule = ForwardingRule {
            rule_name: "r".into(),
            is_enabled: true,
            source_channel_id: ChannelId(-100),
            target_channel_ids: vec![ChannelId(-200)],
            filter_options: Default::default(),
            edit_options: edit,
        };
        let msg = InboundMessage::text(ChannelId(-100), MessageId(3), "Market update");
        RelayTask::new(&msg, Arc::new(rule), ChannelId(-200))
    }

    fn photo(id: i32, caption: &str) -> MediaItem {
        MediaItem::new(MessageId(id), MediaRef::new(MediaKind::Photo, format!("file-{id}")))
            .with_caption(caption, vec![FormattingSpan::new(0, 1, SpanKind::Italic)])
    }

    /// A media task whose album caption is "Chart", bold over the whole word.
    fn media_task(edit: EditOptions, items: Vec<MediaItem>) -> RelayTask {
        let rule = ForwardingRule {
            rule_name: "r".into(),
            is_enabled: true,
            source_channel_id: ChannelId(-100),
            target_channel_ids: vec![ChannelId(-200)],
            filter_options: Default::default(),
            edit_options: edit,
        };
        let msg = InboundMessage {
            spans: vec![FormattingSpan::new(0, 5, SpanKind::Bold)],
            media_group: MediaGroup::new(items),
            ..InboundMessage::text(ChannelId(-100), MessageId(10), "Chart")
        };
        RelayTask::new(&msg, Arc::new(rule), ChannelId(-200))
    }

    #[tokio::test]
    async fn forwards_when_nothing_changes() {
        let fake = Arc::new(FakeTransport::default());
        let exec = DeliveryExecutor::new(fake.clone(), fast_retry());
        let sent = exec
            .deliver(&task(EditOptions::default()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            fake.calls(),
            vec![
                Call::Resolve(-100),
                Call::Resolve(-200),
                Call::Forward {
                    to: -200,
                    ids: vec![MessageId(3)],
                    from: -100,
                    drop_author: false,
                    no_forwards: false,
                },
            ]
        );
    }

    #[tokio::test]
    async fn transient_failures_and_empty_results_are_retried_inline() {
        let fake = Arc::new(FakeTransport::default());
        fake.fail_next(Error::Transport("reset".into()));
        fake.empty_next(1);
        let exec = DeliveryExecutor::new(fake.clone(), fast_retry());
        let edit = EditOptions {
            prepend_text: Some("[NEWS] ".into()),
            ..Default::default()
        };
        exec.deliver(&task(edit), &CancellationToken::new())
            .await
            .unwrap();
        let sends = fake.outbound();
        assert_eq!(sends.len(), 3);
        assert!(matches!(&sends[2], Call::Send { text, .. } if text == "[NEWS] Market update"));
    }

    #[tokio::test]
    async fn rate_limit_is_not_retried_inline() {
        let fake = Arc::new(FakeTransport::default());
        fake.fail_next(Error::RateLimited {
            retry_after: Duration::from_secs(42),
        });
        let exec = DeliveryExecutor::new(fake.clone(), fast_retry());
        let err = exec
            .deliver(&task(EditOptions::default()), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(42)));
        assert_eq!(fake.outbound().len(), 1);
    }

    #[tokio::test]
    async fn unresolvable_peer_escalates() {
        let fake = Arc::new(FakeTransport::default());
        fake.unresolvable(-200);
        let exec = DeliveryExecutor::new(fake.clone(), fast_retry());
        let err = exec
            .deliver(&task(EditOptions::default()), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PeerUnresolved(-200)));
        assert!(err.is_retryable());
        // One source lookup plus five target attempts, nothing sent.
        assert_eq!(fake.calls().len(), 6);
        assert!(fake.outbound().is_empty());
    }

    #[tokio::test]
    async fn exhausted_inline_retry_surfaces_last_error() {
        let fake = Arc::new(FakeTransport::default());
        fake.break_peer(-200);
        let exec = DeliveryExecutor::new(fake.clone(), RetryPolicy::new(3, vec![]));
        let err = exec
            .deliver(&task(EditOptions::default()), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(fake.outbound().len(), 3);
    }

    #[tokio::test]
    async fn cancelled_before_start_does_nothing() {
        let fake = Arc::new(FakeTransport::default());
        let exec = DeliveryExecutor::new(fake.clone(), fast_retry());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = exec
            .deliver(&task(EditOptions::default()), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn single_media_carries_the_transformed_caption() {
        let fake = Arc::new(FakeTransport::default());
        let exec = DeliveryExecutor::new(fake.clone(), fast_retry());
        let edit = EditOptions {
            prepend_text: Some("[NEWS] ".into()),
            no_forwards: true,
            ..Default::default()
        };
        exec.deliver(&media_task(edit, vec![photo(10, "")]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            fake.outbound(),
            vec![Call::Send {
                peer: -200,
                text: "[NEWS] Chart".into(),
                spans: vec![FormattingSpan::new(7, 5, SpanKind::Bold)],
                media: Some(MediaRef::new(MediaKind::Photo, "file-10")),
                flags: SendFlags {
                    no_forwards: true,
                    silent: false,
                },
            }]
        );
    }

    #[tokio::test]
    async fn album_with_dropped_captions_is_sent_bare() {
        let fake = Arc::new(FakeTransport::default());
        fake.fail_next(Error::Transport("reset".into()));
        let exec = DeliveryExecutor::new(fake.clone(), fast_retry());
        let edit = EditOptions {
            drop_media_captions: true,
            prepend_text: Some("[NEWS] ".into()),
            ..Default::default()
        };
        let items = vec![photo(10, ""), photo(11, "second"), photo(12, "third")];
        let sent = exec
            .deliver(&media_task(edit, items), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sent.len(), 3);

        // First attempt failed transiently; the album call was retried inline.
        let calls = fake.outbound();
        assert_eq!(calls.len(), 2);
        for call in calls {
            let Call::Album {
                peer,
                items,
                caption,
                spans,
                ..
            } = call
            else {
                panic!("expected only album sends");
            };
            assert_eq!(peer, -200);
            assert!(caption.is_empty());
            assert!(spans.is_empty());
            assert_eq!(items.len(), 3);
            assert!(items.iter().all(|i| i.caption.is_empty() && i.entities.is_empty()));
        }
    }

    #[tokio::test]
    async fn album_keeps_later_item_captions() {
        let fake = Arc::new(FakeTransport::default());
        let exec = DeliveryExecutor::new(fake.clone(), fast_retry());
        let items = vec![photo(10, ""), photo(11, "second")];
        exec.deliver(
            &media_task(EditOptions::default(), items),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let calls = fake.outbound();
        let Call::Album {
            items, caption, spans, ..
        } = &calls[0]
        else {
            panic!("expected an album send");
        };
        assert_eq!(caption, "Chart");
        assert_eq!(spans, &vec![FormattingSpan::new(0, 5, SpanKind::Bold)]);
        assert!(items[0].caption.is_empty());
        assert_eq!(items[1].caption, "second");
    }

    #[tokio::test]
    async fn cancel_during_inline_backoff_stops_delivery() {
        let fake = Arc::new(FakeTransport::default());
        fake.break_peer(-200);
        let exec = DeliveryExecutor::new(
            fake.clone(),
            RetryPolicy::new(5, vec![Duration::from_secs(30)]),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = exec
            .deliver(&task(EditOptions::default()), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(fake.outbound().len(), 1);
    }

    #[tokio::test]
    async fn emptied_message_sends_configured_placeholder() {
        let fake = Arc::new(FakeTransport::default());
        let exec = DeliveryExecutor::new(fake.clone(), fast_retry()).with_placeholder("[gone]");
        let edit = EditOptions {
            text_replacements: vec![crate::rules::TextReplacement {
                find: "market update".into(),
                replace_with: String::new(),
                is_regex: false,
            }],
            ..Default::default()
        };
        exec.deliver(&task(edit), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(&fake.outbound()[0], Call::Send { text, .. } if text == "[gone]"));
    }
}
