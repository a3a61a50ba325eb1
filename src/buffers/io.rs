use bytes::Bytes;
use tokio::time::Instant;
use tracing::trace;

use crate::buffers::ring::RingBuffer;
use crate::config::{CellSize, ChannelConfig};
use crate::error::{NetworkError, Result};
use crate::frame::{Frame, FrameKind};

/// Sequence number assigned to the first cell pushed into an input channel.
pub const FIRST_SEQUENCE: u16 = 1;

/// One queued message plus its delivery metadata.
#[derive(Debug)]
pub struct Cell {
    pub sequence: u16,
    pub payload: Bytes,
    pub enqueued_at: Instant,
    pub tag: u64,
}

/// The single in-flight unacknowledged cell of a `DataWithAck` channel.
/// At most one exists per channel at any time.
#[derive(Clone, Copy, Debug)]
pub struct AckWaitEntry {
    pub sequence: u16,
    pub sent_at: Instant,
    pub retries: u32,
    /// Set when an ack-path `Retry` decision asks for an immediate resend,
    /// bypassing the timeout bookkeeping.
    pub resend_now: bool,
}

/// Outbound direction: the queue an application pushes into and the sender
/// loop drains.
pub struct InputBuffer {
    pub config: ChannelConfig,
    ring: RingBuffer<Cell>,
    next_sequence: u16,
    pub last_send_at: Option<Instant>,
    pub ack_wait: Option<AckWaitEntry>,
}

impl InputBuffer {
    pub fn new(config: ChannelConfig) -> InputBuffer {
        let ring = RingBuffer::new(config.capacity, config.overwriting);
        InputBuffer {
            config,
            ring,
            next_sequence: FIRST_SEQUENCE,
            last_send_at: None,
            ack_wait: None,
        }
    }

    /// Enqueue a payload, assigning the channel's next sequence number.
    /// Returns the evicted oldest cell if the push overwrote one.
    pub fn push(&mut self, payload: Bytes, tag: u64, now: Instant) -> Result<Option<Cell>> {
        if let CellSize::Fixed(max) = self.config.cell_max_bytes {
            if payload.len() > max {
                return Err(NetworkError::BadParameter("payload exceeds the channel's cell size"));
            }
        }

        let cell = Cell {
            sequence: self.next_sequence,
            payload,
            enqueued_at: now,
            tag,
        };

        let evicted = self.ring.push_back(cell)?;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        // the evicted cell may be the one currently awaiting an ack
        if let (Some(evicted_cell), Some(entry)) = (&evicted, &self.ack_wait) {
            if evicted_cell.sequence == entry.sequence {
                trace!("channel {}: in-flight cell evicted by overwrite", self.config.id);
                self.ack_wait = None;
            }
        }

        Ok(evicted)
    }

    /// Whether the channel's pacing interval has elapsed.
    pub fn pacing_due(&self, now: Instant) -> bool {
        match self.last_send_at {
            None => true,
            Some(at) => now.duration_since(at) >= self.config.min_send_interval,
        }
    }

    /// The head cell, if the channel is ready to transmit a new cell: nothing
    /// in flight, queue non-empty, pacing interval elapsed.
    pub fn next_due(&self, now: Instant) -> Option<&Cell> {
        if self.ack_wait.is_some() {
            return None;
        }
        if !self.pacing_due(now) {
            return None;
        }
        self.ring.front()
    }

    /// The next instant at which this channel needs the sender's attention,
    /// or `None` if it is idle (empty, or waiting for an ack without timeout).
    pub fn next_event_at(&self, now: Instant) -> Option<Instant> {
        if let Some(entry) = &self.ack_wait {
            if entry.resend_now {
                return Some(now);
            }
            return self.config.ack_timeout.map(|timeout| entry.sent_at + timeout);
        }
        if self.ring.is_empty() {
            return None;
        }
        match self.last_send_at {
            None => Some(now),
            Some(at) => Some(at + self.config.min_send_interval),
        }
    }

    pub fn front(&self) -> Option<&Cell> {
        self.ring.front()
    }

    pub fn pop_front(&mut self) -> Option<Cell> {
        self.ring.pop_front()
    }

    /// Drop every queued cell and the outstanding ack entry, resetting the
    /// pacing clock. The drained cells are returned so the caller can emit
    /// one outcome per cell.
    pub fn clear(&mut self) -> Vec<Cell> {
        self.ack_wait = None;
        self.last_send_at = None;
        self.ring.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

/// Inbound direction: populated by the receiver loop, drained by the
/// application's read calls.
pub struct OutputBuffer {
    pub config: ChannelConfig,
    ring: RingBuffer<Bytes>,
    /// Sequence of the last payload delivered into the ring, used to suppress
    /// the duplicate a peer re-sends when its ack got lost.
    last_delivered: Option<u16>,
}

impl OutputBuffer {
    pub fn new(config: ChannelConfig) -> OutputBuffer {
        let ring = RingBuffer::new(config.capacity, config.overwriting);
        OutputBuffer {
            config,
            ring,
            last_delivered: None,
        }
    }

    /// Whether this frame repeats the last delivered sequence (ack-loss
    /// duplicate). Only meaningful for `DataWithAck` traffic.
    pub fn is_duplicate(&self, sequence: u16) -> bool {
        self.last_delivered == Some(sequence)
    }

    /// Store a received frame's payload for the application to read.
    pub fn accept(&mut self, frame: &Frame) -> Result<()> {
        if let CellSize::Fixed(max) = self.config.cell_max_bytes {
            if frame.payload.len() > max {
                return Err(NetworkError::BadParameter("payload exceeds the channel's cell size"));
            }
        }

        // eviction on a full overwriting output silently drops the oldest
        // unread payload
        self.ring.push_back(frame.payload.clone())?;

        if frame.kind == FrameKind::DataWithAck {
            self.last_delivered = Some(frame.sequence);
        }
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<Bytes> {
        self.ring.pop_front()
    }

    pub fn clear(&mut self) {
        // the dedup sequence survives a flush - a retransmit of the last
        // delivered payload is still a duplicate afterwards
        for _ in self.ring.drain() {}
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}
