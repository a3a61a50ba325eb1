use std::cmp::min;
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::{debug, error, trace, warn};

use crate::buffers::io::{AckWaitEntry, InputBuffer};
use crate::callback::{CallbackAction, DeliveryStatus};
use crate::error::TransportError;
use crate::frame::{Frame, FrameKind};
use crate::manager::{Core, InputChannel};

/// Upper bound for one scheduling nap. Keeps the loop responsive to stop
/// requests even when every channel is idle; a push wakes it up early anyway.
const MAX_IDLE_WAIT: Duration = Duration::from_millis(10);

enum RoundOutcome {
    Continue,
    /// A timeout callback asked for all input channels to be flushed.
    FlushAll,
    TransportClosed,
}

/// The single sending worker. Each iteration round-robins over all input
/// channels - one frame per channel per round, so no channel can starve
/// another - then naps until the earliest pacing/retry/probe deadline.
pub(crate) struct SenderLoop {
    core: Arc<Core>,
    run: watch::Receiver<bool>,
}

impl SenderLoop {
    pub fn new(core: Arc<Core>, run: watch::Receiver<bool>) -> SenderLoop {
        SenderLoop { core, run }
    }

    pub async fn run(mut self) {
        debug!("starting sender loop");

        while *self.run.borrow() {
            match self.process_round().await {
                RoundOutcome::TransportClosed => {
                    warn!("transport closed - stopping sender loop");
                    self.core.shutdown();
                    break;
                }
                RoundOutcome::Continue | RoundOutcome::FlushAll => {}
            }

            let wait = self.next_wait().await;
            select! {
                _ = time::sleep(wait) => {}
                _ = self.core.sender_wake.notified() => {}
                _ = self.run.changed() => {}
            }
        }

        debug!("sender loop stopped");
    }

    async fn process_round(&self) -> RoundOutcome {
        let now = Instant::now();

        let probe = self.core.ping.lock().await.maybe_probe(now);
        if let Some(probe) = probe {
            match self.core.transport.send(&probe).await {
                Ok(()) => {}
                Err(TransportError::Closed) => return RoundOutcome::TransportClosed,
                Err(e) => error!("failed to send probe: {}", e),
            }
        }

        for chan in &self.core.inputs {
            match self.process_channel(chan, now).await {
                RoundOutcome::Continue => {}
                RoundOutcome::FlushAll => self.core.flush_all_inputs().await,
                RoundOutcome::TransportClosed => return RoundOutcome::TransportClosed,
            }
        }

        RoundOutcome::Continue
    }

    async fn process_channel(&self, chan: &InputChannel, now: Instant) -> RoundOutcome {
        let mut buf = chan.buffer.lock().await;

        if let Some(entry) = buf.ack_wait {
            if entry.resend_now {
                return self.retransmit(&mut buf, entry, now).await;
            }

            let timed_out = match buf.config.ack_timeout {
                Some(timeout) => now.duration_since(entry.sent_at) >= timeout,
                None => false,
            };
            if !timed_out {
                return RoundOutcome::Continue;
            }

            return self.handle_ack_timeout(&mut buf, entry, now).await;
        }

        if buf.next_due(now).is_some() {
            return self.send_head(&mut buf, now).await;
        }

        RoundOutcome::Continue
    }

    /// The ack deadline of the in-flight cell expired. While the retry budget
    /// is open the application decides via the `Timeout` outcome; once it is
    /// spent the cell is dropped with `Cancel`, no questions asked.
    async fn handle_ack_timeout(&self, buf: &mut InputBuffer, entry: AckWaitEntry, now: Instant) -> RoundOutcome {
        let channel_id = buf.config.id;

        let budget_open = match buf.config.max_retries {
            None => true,
            Some(max) => entry.retries < max,
        };
        if !budget_open {
            debug!("channel {}: retry budget exhausted for seq {} - dropping cell", channel_id, entry.sequence);
            let cell = buf.pop_front().expect("ack wait without a queued cell");
            buf.ack_wait = None;
            self.core.callback.on_outcome(channel_id, &cell.payload, cell.tag, DeliveryStatus::Cancel);
            return RoundOutcome::Continue;
        }

        let (payload, tag) = {
            let cell = buf.front().expect("ack wait without a queued cell");
            (cell.payload.clone(), cell.tag)
        };

        let action = self.core.callback.on_outcome(channel_id, &payload, tag, DeliveryStatus::Timeout);
        match action {
            CallbackAction::Retry => {
                trace!("channel {}: retrying seq {} ({} retries used)", channel_id, entry.sequence, entry.retries + 1);
                let entry = AckWaitEntry { retries: entry.retries + 1, ..entry };
                self.retransmit(buf, entry, now).await
            }
            CallbackAction::Flush => RoundOutcome::FlushAll,
            CallbackAction::DataPop | CallbackAction::Default => {
                if action == CallbackAction::Default {
                    warn!("channel {}: Default action is not valid for a Timeout outcome - popping", channel_id);
                }
                let cell = buf.pop_front().expect("ack wait without a queued cell");
                buf.ack_wait = None;
                self.core.callback.on_outcome(channel_id, &cell.payload, cell.tag, DeliveryStatus::Cancel);
                RoundOutcome::Continue
            }
        }
    }

    /// Send the in-flight cell again, keeping its sequence number.
    async fn retransmit(&self, buf: &mut InputBuffer, entry: AckWaitEntry, now: Instant) -> RoundOutcome {
        let frame = {
            let cell = buf.front().expect("ack wait without a queued cell");
            Frame::data(buf.config.id, buf.config.kind, cell.sequence, cell.payload.clone())
        };

        match self.core.transport.send(&frame).await {
            Ok(()) => {}
            Err(TransportError::Closed) => return RoundOutcome::TransportClosed,
            // count the attempt anyway; the next expiry will try again
            Err(e) => error!("retransmit failed on channel {}: {}", buf.config.id, e),
        }

        buf.last_send_at = Some(now);
        buf.ack_wait = Some(AckWaitEntry { sent_at: now, resend_now: false, ..entry });
        RoundOutcome::Continue
    }

    /// Transmit the head cell for the first time. Fire-and-forget kinds pop
    /// immediately; `DataWithAck` keeps the cell queued and opens the ack
    /// window.
    async fn send_head(&self, buf: &mut InputBuffer, now: Instant) -> RoundOutcome {
        let channel_id = buf.config.id;
        let (frame, tag) = {
            let cell = buf.front().expect("next_due returned a cell");
            (Frame::data(channel_id, buf.config.kind, cell.sequence, cell.payload.clone()), cell.tag)
        };

        trace!("channel {}: sending seq {}", channel_id, frame.sequence);
        match self.core.transport.send(&frame).await {
            Ok(()) => {}
            Err(TransportError::Closed) => return RoundOutcome::TransportClosed,
            Err(e) => {
                // the cell stays queued and is picked up on a later round
                error!("send failed on channel {}: {}", channel_id, e);
                return RoundOutcome::Continue;
            }
        }

        buf.last_send_at = Some(now);
        match buf.config.kind {
            FrameKind::DataWithAck => {
                buf.ack_wait = Some(AckWaitEntry {
                    sequence: frame.sequence,
                    sent_at: now,
                    retries: 0,
                    resend_now: false,
                });
                self.core.callback.on_outcome(channel_id, &frame.payload, tag, DeliveryStatus::Sent);
            }
            _ => {
                let cell = buf.pop_front().expect("next_due returned a cell");
                self.core.callback.on_outcome(channel_id, &cell.payload, cell.tag, DeliveryStatus::Sent);
            }
        }

        RoundOutcome::Continue
    }

    /// How long to nap: until the earliest channel deadline or probe, capped.
    async fn next_wait(&self) -> Duration {
        let now = Instant::now();

        let mut next = self.core.ping.lock().await.next_probe_at();
        for chan in &self.core.inputs {
            let buf = chan.buffer.lock().await;
            if let Some(at) = buf.next_event_at(now) {
                next = Some(match next {
                    Some(cur) => min(cur, at),
                    None => at,
                });
            }
        }

        match next {
            Some(at) => min(at.duration_since(now), MAX_IDLE_WAIT),
            None => MAX_IDLE_WAIT,
        }
    }
}
