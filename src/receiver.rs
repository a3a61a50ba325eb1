use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, span, trace, warn, Instrument, Level};
use uuid::Uuid;

use crate::callback::{CallbackAction, DeliveryStatus};
use crate::error::TransportError;
use crate::frame::{Frame, FrameKind};
use crate::manager::Core;

/// How long one `transport.receive` call may block. Short enough that a stop
/// request is observed promptly.
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// The single receiving worker: polls the transport, resolves acks against
/// the input channels, demultiplexes data frames into the output channels and
/// answers acknowledged data with an immediate ack frame.
pub(crate) struct ReceiverLoop {
    core: Arc<Core>,
    run: watch::Receiver<bool>,
}

impl ReceiverLoop {
    pub fn new(core: Arc<Core>, run: watch::Receiver<bool>) -> ReceiverLoop {
        ReceiverLoop { core, run }
    }

    pub async fn run(self) {
        info!("starting receive loop");

        while *self.run.borrow() {
            let frame = match self.core.transport.receive(POLL_TIMEOUT).await {
                Ok(Some(frame)) => frame,
                Ok(None) => continue, // poll timeout - re-check the run flag
                Err(TransportError::Closed) => {
                    warn!("transport closed - stopping receive loop");
                    self.core.shutdown();
                    break;
                }
                Err(e) => {
                    error!("socket error: {}", e);
                    continue;
                }
            };

            let correlation_id = Uuid::new_v4();
            let span = span!(Level::TRACE, "frame_received", ?correlation_id);

            trace!(parent: &span, "received frame {:?}", frame);
            self.dispatch(frame).instrument(span).await;
        }

        debug!("receive loop stopped");
    }

    async fn dispatch(&self, frame: Frame) {
        match frame.kind {
            FrameKind::Ack => self.on_ack(frame).await,
            FrameKind::Data => self.on_data(frame).await,
            FrameKind::DataWithAck => self.on_data(frame).await,
            FrameKind::KeepAlive => self.on_keep_alive(frame).await,
            FrameKind::Uninitialized => debug!("dropping frame with uninitialized kind"),
        }
    }

    /// Resolve an acknowledgement against the matching channel's single
    /// outstanding cell. Anything that does not match is ignored - acks for
    /// already-resolved or given-up cells are expected under loss.
    async fn on_ack(&self, frame: Frame) {
        let Some(chan) = self.core.input_map.get(&frame.channel_id) else {
            debug!("ack for unknown channel {} - ignoring", frame.channel_id);
            return;
        };

        let flush_requested = {
            let mut buf = chan.buffer.lock().await;

            match buf.ack_wait {
                Some(entry) if entry.sequence == frame.sequence => {}
                _ => {
                    debug!("unexpected ack seq {} on channel {} - ignoring", frame.sequence, frame.channel_id);
                    return;
                }
            }

            let (payload, tag) = {
                let cell = buf.front().expect("ack wait without a queued cell");
                (cell.payload.clone(), cell.tag)
            };
            let action = self.core.callback.on_outcome(frame.channel_id, &payload, tag, DeliveryStatus::AckReceived);

            match action {
                CallbackAction::Retry => {
                    // start the delivery over: fresh retry budget, resend at once
                    trace!("channel {}: application asked to resend seq {}", frame.channel_id, frame.sequence);
                    if let Some(entry) = &mut buf.ack_wait {
                        entry.retries = 0;
                        entry.resend_now = true;
                    }
                    self.core.sender_wake.notify_one();
                    false
                }
                other => {
                    buf.pop_front();
                    buf.ack_wait = None;
                    other == CallbackAction::Flush
                }
            }
        };

        if flush_requested {
            self.core.flush_all_inputs().await;
        }
    }

    /// Demultiplex a data frame into its output channel. Acknowledged data is
    /// acked back whether it was novel or a duplicate - the peer may be
    /// re-sending only because our previous ack was lost.
    async fn on_data(&self, frame: Frame) {
        let with_ack = frame.kind == FrameKind::DataWithAck;

        match self.core.output_map.get(&frame.channel_id) {
            None => {
                debug!("data frame for unknown channel {} - dropping", frame.channel_id);
                // no ack either: for the peer this channel does not exist
                return;
            }
            Some(chan) => {
                let mut buf = chan.buffer.lock().await;

                if with_ack && buf.is_duplicate(frame.sequence) {
                    trace!("duplicate seq {} on channel {} - suppressing delivery", frame.sequence, frame.channel_id);
                }
                else {
                    match buf.accept(&frame) {
                        Ok(()) => {
                            drop(buf);
                            chan.data_ready.notify_one();
                        }
                        Err(e) => debug!("cannot deliver frame on channel {}: {}", frame.channel_id, e),
                    }
                }
            }
        }

        if with_ack {
            let ack = Frame::ack(frame.channel_id, frame.sequence);
            match self.core.transport.send(&ack).await {
                Ok(()) => {}
                Err(TransportError::Closed) => {
                    warn!("transport closed - stopping receive loop");
                    self.core.shutdown();
                }
                Err(e) => error!("failed to send ack on channel {}: {}", frame.channel_id, e),
            }
        }
    }

    async fn on_keep_alive(&self, frame: Frame) {
        let echo = self.core.ping.lock().await.on_keep_alive(&frame, Instant::now());

        if let Some(echo) = echo {
            match self.core.transport.send(&echo).await {
                Ok(()) => {}
                Err(TransportError::Closed) => {
                    warn!("transport closed - stopping receive loop");
                    self.core.shutdown();
                }
                Err(e) => error!("failed to send probe echo: {}", e),
            }
        }
    }
}
