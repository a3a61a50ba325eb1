//! Shared helpers for the crate's tests: in-memory transports and a
//! recording delivery callback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::callback::{CallbackAction, DeliveryCallback, DeliveryStatus};
use crate::error::TransportError;
use crate::frame::Frame;
use crate::transport::Transport;

/// Records every frame handed to it and never produces inbound traffic.
/// The receive side sleeps through its poll timeout, which keeps paused-time
/// tests advancing.
pub(crate) struct SilentTransport {
    sent: std::sync::Mutex<Vec<(Instant, Frame)>>,
}

impl SilentTransport {
    pub fn new() -> Arc<SilentTransport> {
        Arc::new(SilentTransport {
            sent: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.sent.lock().unwrap().iter().map(|(_, f)| f.clone()).collect()
    }

    pub fn timed_frames(&self) -> Vec<(Instant, Frame)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for SilentTransport {
    async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push((Instant::now(), frame.clone()));
        Ok(())
    }

    async fn receive(&self, poll_timeout: Duration) -> Result<Option<Frame>, TransportError> {
        time::sleep(poll_timeout).await;
        Ok(None)
    }
}

/// Two transports connected back-to-back: whatever one sends, the other
/// receives. Lossless and ordered - good enough to exercise the engine's
/// happy paths end to end.
pub(crate) struct PairedTransport {
    tx: mpsc::UnboundedSender<Frame>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
}

pub(crate) fn paired_transports() -> (Arc<PairedTransport>, Arc<PairedTransport>) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();

    let a = Arc::new(PairedTransport { tx: a_tx, rx: tokio::sync::Mutex::new(a_rx) });
    let b = Arc::new(PairedTransport { tx: b_tx, rx: tokio::sync::Mutex::new(b_rx) });
    (a, b)
}

#[async_trait]
impl Transport for PairedTransport {
    async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        self.tx.send(frame.clone()).map_err(|_| TransportError::Closed)
    }

    async fn receive(&self, poll_timeout: Duration) -> Result<Option<Frame>, TransportError> {
        let mut rx = self.rx.lock().await;
        match time::timeout(poll_timeout, rx.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => Err(TransportError::Closed),
        }
    }
}

/// Collects every delivery outcome and answers `Timeout` / `AckReceived`
/// with configured actions.
pub(crate) struct RecordingCallback {
    events: std::sync::Mutex<Vec<(u16, u64, DeliveryStatus)>>,
    timeout_action: CallbackAction,
    ack_action: CallbackAction,
}

impl RecordingCallback {
    pub fn new() -> Arc<RecordingCallback> {
        Self::with_actions(CallbackAction::Retry, CallbackAction::Default)
    }

    pub fn with_timeout_action(timeout_action: CallbackAction) -> Arc<RecordingCallback> {
        Self::with_actions(timeout_action, CallbackAction::Default)
    }

    pub fn with_ack_action(ack_action: CallbackAction) -> Arc<RecordingCallback> {
        Self::with_actions(CallbackAction::Retry, ack_action)
    }

    pub fn with_actions(timeout_action: CallbackAction, ack_action: CallbackAction) -> Arc<RecordingCallback> {
        Arc::new(RecordingCallback {
            events: std::sync::Mutex::new(Vec::new()),
            timeout_action,
            ack_action,
        })
    }

    pub fn events(&self) -> Vec<(u16, u64, DeliveryStatus)> {
        self.events.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<DeliveryStatus> {
        self.events.lock().unwrap().iter().map(|(_, _, s)| *s).collect()
    }
}

impl DeliveryCallback for RecordingCallback {
    fn on_outcome(&self, channel_id: u16, _payload: &Bytes, tag: u64, status: DeliveryStatus) -> CallbackAction {
        self.events.lock().unwrap().push((channel_id, tag, status));
        match status {
            DeliveryStatus::Timeout => self.timeout_action,
            DeliveryStatus::AckReceived => self.ack_action,
            _ => CallbackAction::Default,
        }
    }
}
