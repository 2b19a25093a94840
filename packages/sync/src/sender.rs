//! Editor-side end of the synchronization channel
//!
//! ## Send policy
//!
//! 1. Until the preview sends `PREVIEW_READY`, outbound messages are queued
//! 2. On the handshake the queue is flushed, in original order
//! 3. After the handshake every message is posted immediately; if the
//!    endpoint is unreachable a single retry is scheduled after a fixed delay
//!
//! Delivery is fire-and-forget: nothing waits for acknowledgement.

use std::sync::Arc;
use std::time::Duration;

use pagecraft_model::Section;
use tracing::{debug, warn};

use crate::{decode, encode, PreviewMessage, PreviewTransport, ProtocolError, TransportError};

/// What happened to one outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Delivered,
    /// Held until the preview handshake
    Queued,
    /// First attempt failed; one retry is pending
    RetryScheduled,
    Dropped,
}

/// Inbound message, decoded for the session
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Handshake; carries the preview's current view
    Ready {
        sections: Vec<Arc<Section>>,
        flushed: usize,
    },
    SelectionChanged {
        section_id: String,
        block_id: Option<String>,
    },
    /// Unknown or outbound-only types
    Ignored,
}

pub struct PreviewSender {
    transport: Arc<dyn PreviewTransport>,
    retry_delay: Duration,
    ready: bool,
    queue: Vec<PreviewMessage>,
}

impl PreviewSender {
    pub fn new(transport: Arc<dyn PreviewTransport>, retry_delay: Duration) -> Self {
        Self {
            transport,
            retry_delay,
            ready: false,
            queue: Vec::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Messages held for the next handshake, in send order
    pub fn queued_messages(&self) -> &[PreviewMessage] {
        &self.queue
    }

    pub fn send(&mut self, message: PreviewMessage) -> SendStatus {
        if !self.ready {
            debug!(kind = message.kind(), "Preview not ready, queueing message");
            self.queue.push(message);
            return SendStatus::Queued;
        }
        self.deliver(&message)
    }

    pub fn send_all(&mut self, messages: impl IntoIterator<Item = PreviewMessage>) {
        for message in messages {
            self.send(message);
        }
    }

    /// Mark the preview initialized and flush queued messages in order.
    /// Returns how many were flushed.
    pub fn mark_ready(&mut self) -> usize {
        self.ready = true;
        let queued = std::mem::take(&mut self.queue);
        let flushed = queued.len();
        for message in &queued {
            self.deliver(message);
        }
        if flushed > 0 {
            debug!(flushed, "Flushed queued preview messages");
        }
        flushed
    }

    /// The preview surface went away (e.g. reloaded); queue until the next handshake
    pub fn reset(&mut self) {
        self.ready = false;
    }

    /// Decode and handle a message posted by the preview
    pub fn handle_inbound(&mut self, payload: &str) -> Result<InboundEvent, ProtocolError> {
        let message = decode(payload)?;
        Ok(self.handle_message(message))
    }

    pub fn handle_message(&mut self, message: PreviewMessage) -> InboundEvent {
        match message {
            PreviewMessage::PreviewReady { sections } => {
                let flushed = self.mark_ready();
                InboundEvent::Ready { sections, flushed }
            }
            PreviewMessage::SelectionChanged {
                section_id,
                block_id,
            } => InboundEvent::SelectionChanged {
                section_id,
                block_id,
            },
            other => {
                debug!(kind = other.kind(), "Ignoring inbound message");
                InboundEvent::Ignored
            }
        }
    }

    fn deliver(&self, message: &PreviewMessage) -> SendStatus {
        let payload = match encode(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, kind = message.kind(), "Failed to encode preview message");
                return SendStatus::Dropped;
            }
        };

        match self.transport.post(payload.clone()) {
            Ok(()) => SendStatus::Delivered,
            Err(TransportError::Unreachable) => self.schedule_retry(payload, message.kind()),
            Err(e) => {
                warn!(error = %e, kind = message.kind(), "Dropping preview message");
                SendStatus::Dropped
            }
        }
    }

    fn schedule_retry(&self, payload: String, kind: &'static str) -> SendStatus {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(kind, "Preview unreachable and no runtime for retry; dropping");
            return SendStatus::Dropped;
        };

        let transport = Arc::clone(&self.transport);
        let delay = self.retry_delay;
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = transport.post(payload) {
                warn!(error = %e, kind, "Preview retry failed; dropping message");
            }
        });
        SendStatus::RetryScheduled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordingTransport;

    fn delete(id: &str) -> PreviewMessage {
        PreviewMessage::SectionDelete {
            section_id: id.to_string(),
        }
    }

    #[test]
    fn test_queues_until_ready_then_flushes_in_order() {
        let transport = Arc::new(RecordingTransport::new());
        let mut sender = PreviewSender::new(transport.clone(), Duration::from_millis(100));

        assert_eq!(sender.send(delete("a")), SendStatus::Queued);
        assert_eq!(sender.send(delete("b")), SendStatus::Queued);
        assert!(transport.payloads().is_empty());

        let event = sender
            .handle_inbound(r#"{ "type": "PREVIEW_READY", "sections": [] }"#)
            .unwrap();
        assert_eq!(
            event,
            InboundEvent::Ready {
                sections: vec![],
                flushed: 2
            }
        );
        assert_eq!(transport.messages(), vec![delete("a"), delete("b")]);
        assert_eq!(sender.send(delete("c")), SendStatus::Delivered);
    }

    #[test]
    fn test_unknown_inbound_ignored() {
        let transport = Arc::new(RecordingTransport::new());
        let mut sender = PreviewSender::new(transport, Duration::from_millis(100));
        let event = sender.handle_inbound(r#"{ "type": "SCROLL", "y": 3 }"#).unwrap();
        assert_eq!(event, InboundEvent::Ignored);
        assert!(!sender.is_ready());
    }

    #[test]
    fn test_unreachable_without_runtime_drops() {
        let transport = Arc::new(RecordingTransport::new());
        let mut sender = PreviewSender::new(transport.clone(), Duration::from_millis(100));
        sender.mark_ready();
        transport.fail_next(1);
        assert_eq!(sender.send(delete("a")), SendStatus::Dropped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_retries_once_after_delay() {
        let transport = Arc::new(RecordingTransport::new());
        let mut sender = PreviewSender::new(transport.clone(), Duration::from_millis(100));
        sender.mark_ready();
        transport.fail_next(1);

        assert_eq!(sender.send(delete("a")), SendStatus::RetryScheduled);
        assert!(transport.payloads().is_empty());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(transport.messages(), vec![delete("a")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_second_failure() {
        let transport = Arc::new(RecordingTransport::new());
        let mut sender = PreviewSender::new(transport.clone(), Duration::from_millis(100));
        sender.mark_ready();
        transport.fail_next(2);

        sender.send(delete("a"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(transport.payloads().is_empty());
    }

    #[test]
    fn test_reset_requeues() {
        let transport = Arc::new(RecordingTransport::new());
        let mut sender = PreviewSender::new(transport.clone(), Duration::from_millis(100));
        sender.mark_ready();
        sender.reset();
        assert_eq!(sender.send(delete("a")), SendStatus::Queued);
        assert_eq!(sender.queued(), 1);
    }
}
