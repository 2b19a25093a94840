//! Delivery endpoints for encoded preview messages

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::{decode, PreviewMessage, TransportError};

/// Where encoded messages go; posting never blocks
pub trait PreviewTransport: Send + Sync {
    fn post(&self, payload: String) -> Result<(), TransportError>;
}

/// Forwards payloads into a tokio channel read by the preview side
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<String>,
    attached: Arc<AtomicBool>,
}

impl ChannelTransport {
    /// Returns the transport and the receiving end for the preview surface.
    /// The endpoint starts detached.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            tx,
            attached: Arc::new(AtomicBool::new(false)),
        };
        (transport, rx)
    }

    pub fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::SeqCst);
    }
}

impl PreviewTransport for ChannelTransport {
    fn post(&self, payload: String) -> Result<(), TransportError> {
        if !self.attached.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable);
        }
        self.tx.send(payload).map_err(|_| TransportError::Closed)
    }
}

/// Keeps every delivered payload in memory
#[derive(Debug, Default)]
pub struct RecordingTransport {
    payloads: Mutex<Vec<String>>,
    /// Number of upcoming posts that report `Unreachable`
    unreachable_for: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` posts fail as unreachable
    pub fn fail_next(&self, count: usize) {
        self.unreachable_for.store(count, Ordering::SeqCst);
    }

    pub fn payloads(&self) -> Vec<String> {
        self.payloads
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Delivered payloads decoded back into messages
    pub fn messages(&self) -> Vec<PreviewMessage> {
        self.payloads()
            .iter()
            .filter_map(|p| decode(p).ok())
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut payloads) = self.payloads.lock() {
            payloads.clear();
        }
    }
}

impl PreviewTransport for RecordingTransport {
    fn post(&self, payload: String) -> Result<(), TransportError> {
        let failing = self
            .unreachable_for
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(TransportError::Unreachable);
        }
        self.payloads
            .lock()
            .map_err(|_| TransportError::Closed)?
            .push(payload);
        Ok(())
    }
}
