use std::time::Duration;

use crate::error::{NetworkError, Result};
use crate::frame::FrameKind;

/// Channel ids below this value are reserved for the engine's own keepalive
/// traffic (probe and probe echo).
pub const FIRST_APPLICATION_ID: u16 = 2;

/// Upper bound for a cell payload, or no bound at all for channels carrying
/// externally-owned data of varying size.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CellSize {
    Fixed(usize),
    Variable,
}

/// Static configuration of one channel. Created once, before the manager, and
/// never mutated afterwards - the set of channels is fixed at construction.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Channel identifier. Unique within its direction; the input and output
    /// id namespaces are independent of each other.
    pub id: u16,
    /// Frame kind sent for cells of this channel. `DataWithAck` channels run
    /// the acknowledged-with-retry state machine, everything else is
    /// fire-and-forget.
    pub kind: FrameKind,
    /// Number of cells the channel's ring buffer holds.
    pub capacity: usize,
    pub cell_max_bytes: CellSize,
    /// Whether a push into a full channel evicts the oldest cell (true) or
    /// fails with `BufferFull` (false).
    pub overwriting: bool,
    /// Minimum pacing interval between two sends on this channel.
    pub min_send_interval: Duration,
    /// Time to wait for an acknowledgement before the retry machinery kicks
    /// in. `None` waits forever. Only meaningful for `DataWithAck`.
    pub ack_timeout: Option<Duration>,
    /// Retry budget for unacknowledged cells. `None` is unlimited.
    pub max_retries: Option<u32>,
}

impl ChannelConfig {
    pub fn new(id: u16, kind: FrameKind) -> ChannelConfig {
        ChannelConfig {
            id,
            kind,
            capacity: 1,
            cell_max_bytes: CellSize::Variable,
            overwriting: false,
            min_send_interval: Duration::from_millis(1),
            ack_timeout: None,
            max_retries: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id < FIRST_APPLICATION_ID {
            return Err(NetworkError::BadParameter("channel id is reserved for keepalive"));
        }
        if self.kind == FrameKind::Uninitialized {
            return Err(NetworkError::BadParameter("channel kind is uninitialized"));
        }
        if self.capacity == 0 {
            return Err(NetworkError::BadParameter("channel capacity is zero"));
        }
        match self.cell_max_bytes {
            CellSize::Fixed(0) => {
                return Err(NetworkError::BadParameter("fixed cell size is zero"));
            }
            CellSize::Fixed(max) => {
                // the ring stores `capacity` cells of up to `max` bytes each
                if self.capacity.checked_mul(max).is_none() {
                    return Err(NetworkError::Allocation("channel buffer size overflows"));
                }
            }
            CellSize::Variable => {}
        }
        Ok(())
    }
}
