//! A reliable, multiplexed messaging engine for moving discrete, typed
//! messages between two endpoints over an unreliable datagram channel. Built
//! for real-time command/telemetry links (e.g. a controller talking to a
//! vehicle) where bounded latency and bounded memory matter more than
//! arbitrary throughput.
//!
//! ## Design goals
//!
//! * The abstraction is sending / receiving *messages* (defined-length chunks
//!   of data as opposed to streams of bytes)
//! * Multiple independent logical channels over one datagram link, each with
//!   its own delivery policy:
//!   * best-effort fire-and-forget data
//!   * acknowledged data with bounded retransmission - at most one
//!     unacknowledged cell in flight per channel at any time
//!   * periodic liveness probing, independent of any channel
//! * Bounded memory: every channel is a fixed-capacity ring buffer, with a
//!   per-channel choice between rejecting new data when full and overwriting
//!   the oldest queued cell (stale telemetry is worthless; the newest sample
//!   wins)
//! * Bounded latency: per-channel pacing intervals, a round-robin sender that
//!   cannot let one channel starve another, and no unbounded waits anywhere
//!   in the scheduling loops
//! * The set of channels is fixed at construction time - no dynamic channel
//!   management, no handshake
//! * The application observes every cell's fate (sent, acknowledged, timed
//!   out, cancelled, evicted) through a single callback and steers the retry
//!   machinery through its return value
//! * The engine never manages sockets, addressing or encryption; it consumes
//!   a minimal send/receive transport contract
//!
//! ## Wire format
//!
//! One frame per datagram, all numbers little-endian:
//!
//! ```ascii
//! 0: channel id (u16)
//! 2: kind (u8):
//!    * 0 uninitialized (never valid on the wire)
//!    * 1 ACK - acknowledges `sequence` on the named channel, no payload
//!    * 2 DATA - fire-and-forget
//!    * 3 DATA_WITH_ACK - the receiver answers with an ACK frame
//!    * 4 KEEP_ALIVE - liveness probe or probe echo, `sequence` carries the
//!      probe token, no payload
//! 3: sequence (u16): per-channel, assigned at enqueue time, wraps
//! 5: payload length (u32)
//! 9: payload bytes
//! ```
//!
//! Channel ids 0 and 1 are reserved for keepalive probes and their echoes;
//! application channels start at id 2. Input and output channel ids are
//! independent namespaces: input channel X on one side pairs with output
//! channel X on the other.
//!
//! ## Related
//!
//! * TCP: full reliability and strict ordering, but head-of-line blocking and
//!   unbounded buffering - the opposite trade-off of this engine
//! * QUIC: stream multiplexing over UDP, but connection handshakes,
//!   encryption and congestion control are out of scope here
//! * MAVLink-style telemetry links: similar per-message policies, but no
//!   per-channel queues with an overwrite-under-pressure policy

pub mod buffers;
pub mod callback;
pub mod config;
pub mod error;
pub mod frame;
pub mod manager;
pub mod ping;
pub mod transport;

mod receiver;
mod sender;

#[cfg(test)]
mod test_util;
