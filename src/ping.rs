use std::cmp::max;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::frame::{Frame, FrameKind};

/// Channel id of a liveness probe. Reserved, never usable by applications.
pub const PROBE_CHANNEL_ID: u16 = 0;
/// Channel id of a probe echo.
pub const ECHO_CHANNEL_ID: u16 = 1;

/// Probe interval used when the application asks for the default.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(50);

/// An outstanding probe older than this is considered lost: the recorded
/// round-trip degrades to unknown and a fresh probe may be sent.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Periodic liveness probing, independent of any per-channel delivery state.
///
/// A probe is a `KeepAlive` frame whose sequence field carries a token; the
/// peer echoes the token back and the round-trip is measured locally against
/// the remembered send time. Purely advisory - a silent peer never aborts the
/// transport, it only shows up in `last_seen_peer`.
pub struct PingMonitor {
    interval: Option<Duration>,
    next_token: u16,
    /// Token and send time of the probe currently in flight.
    outstanding: Option<(u16, Instant)>,
    last_probe_at: Option<Instant>,
    last_rtt: Option<Duration>,
    last_seen_peer: Option<Instant>,
}

impl PingMonitor {
    pub fn new(interval: Option<Duration>) -> PingMonitor {
        let interval = match interval {
            Some(Duration::ZERO) => Some(DEFAULT_PROBE_INTERVAL),
            other => other,
        };

        PingMonitor {
            interval,
            next_token: 0,
            outstanding: None,
            last_probe_at: None,
            last_rtt: None,
            last_seen_peer: None,
        }
    }

    /// A new probe frame if one is due: no probe outstanding and the interval
    /// elapsed, or the outstanding probe aged past the probe timeout.
    pub fn maybe_probe(&mut self, now: Instant) -> Option<Frame> {
        let interval = self.interval?;

        let due = match self.last_probe_at {
            None => true,
            Some(at) => {
                let age = now.duration_since(at);
                (self.outstanding.is_none() && age >= interval) || age >= PROBE_TIMEOUT
            }
        };
        if !due {
            return None;
        }

        if let Some((token, sent_at)) = self.outstanding {
            if now.duration_since(sent_at) >= PROBE_TIMEOUT {
                debug!("probe {} went unanswered - marking round-trip unknown", token);
                self.last_rtt = None;
            }
        }

        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1);
        self.outstanding = Some((token, now));
        self.last_probe_at = Some(now);

        trace!("sending probe {}", token);
        Some(Frame::keep_alive(PROBE_CHANNEL_ID, token))
    }

    /// Handle an inbound `KeepAlive` frame. A peer probe is answered with an
    /// echo frame (returned for the caller to send); an echo of our own probe
    /// completes the round-trip measurement.
    pub fn on_keep_alive(&mut self, frame: &Frame, now: Instant) -> Option<Frame> {
        debug_assert_eq!(frame.kind, FrameKind::KeepAlive);
        self.last_seen_peer = Some(now);

        match frame.channel_id {
            PROBE_CHANNEL_ID => {
                trace!("echoing peer probe {}", frame.sequence);
                Some(Frame::keep_alive(ECHO_CHANNEL_ID, frame.sequence))
            }
            ECHO_CHANNEL_ID => {
                match self.outstanding {
                    Some((token, sent_at)) if token == frame.sequence => {
                        self.last_rtt = Some(now.duration_since(sent_at));
                        self.outstanding = None;
                    }
                    _ => debug!("unexpected probe echo {} - ignoring", frame.sequence),
                }
                None
            }
            other => {
                debug!("keepalive frame on unexpected channel {} - ignoring", other);
                None
            }
        }
    }

    /// Estimated link latency: the last measured round-trip, or the age of the
    /// probe currently in flight if that is already larger (reacts to spikes
    /// before the late echo arrives). Unknown until the first echo.
    pub fn estimated_latency(&self, now: Instant) -> Option<Duration> {
        let last_rtt = self.last_rtt?;
        match self.outstanding {
            Some((_, sent_at)) => Some(max(last_rtt, now.duration_since(sent_at))),
            None => Some(last_rtt),
        }
    }

    /// When the peer was last heard from via keepalive traffic.
    pub fn last_seen_peer(&self) -> Option<Instant> {
        self.last_seen_peer
    }

    /// The next instant at which `maybe_probe` will have something to do.
    pub fn next_probe_at(&self) -> Option<Instant> {
        let interval = self.interval?;
        match self.last_probe_at {
            None => None, // due right away; the caller probes before waiting
            Some(at) => {
                if self.outstanding.is_some() {
                    Some(at + PROBE_TIMEOUT)
                }
                else {
                    Some(at + interval)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::runtime::Builder;

    fn paused<F: std::future::Future<Output = ()>>(f: F) {
        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(f);
    }

    #[test]
    fn test_disabled_monitor_never_probes() {
        paused(async {
            let mut ping = PingMonitor::new(None);
            assert!(ping.maybe_probe(Instant::now()).is_none());
            assert!(ping.next_probe_at().is_none());
        });
    }

    #[test]
    fn test_zero_interval_means_default() {
        paused(async {
            let mut ping = PingMonitor::new(Some(Duration::ZERO));
            assert!(ping.maybe_probe(Instant::now()).is_some());
        });
    }

    #[test]
    fn test_single_probe_until_answered() {
        paused(async {
            let mut ping = PingMonitor::new(Some(Duration::from_millis(50)));
            let t0 = Instant::now();

            let probe = ping.maybe_probe(t0).unwrap();
            assert_eq!(probe.channel_id, PROBE_CHANNEL_ID);
            assert_eq!(probe.kind, FrameKind::KeepAlive);

            // outstanding and below the probe timeout: no new probe, even
            // long past the interval
            assert!(ping.maybe_probe(t0 + Duration::from_millis(60)).is_none());
            assert!(ping.maybe_probe(t0 + Duration::from_millis(500)).is_none());

            // the echo completes the measurement and re-arms the interval
            let echo = Frame::keep_alive(ECHO_CHANNEL_ID, probe.sequence);
            ping.on_keep_alive(&echo, t0 + Duration::from_millis(20));
            assert_eq!(ping.estimated_latency(t0 + Duration::from_millis(20)), Some(Duration::from_millis(20)));

            assert!(ping.maybe_probe(t0 + Duration::from_millis(49)).is_none());
            let second = ping.maybe_probe(t0 + Duration::from_millis(50)).unwrap();
            assert_ne!(second.sequence, probe.sequence);
        });
    }

    #[test]
    fn test_unanswered_probe_degrades_rtt() {
        paused(async {
            let mut ping = PingMonitor::new(Some(Duration::from_millis(50)));
            let t0 = Instant::now();

            let probe = ping.maybe_probe(t0).unwrap();
            ping.on_keep_alive(&Frame::keep_alive(ECHO_CHANNEL_ID, probe.sequence), t0 + Duration::from_millis(10));
            assert!(ping.estimated_latency(t0 + Duration::from_millis(10)).is_some());

            // the second probe is never answered; once it ages past the probe
            // timeout, the old measurement is not trustworthy anymore
            ping.maybe_probe(t0 + Duration::from_millis(100)).unwrap();
            let retry = ping.maybe_probe(t0 + Duration::from_millis(100) + PROBE_TIMEOUT);
            assert!(retry.is_some());
            assert!(ping.estimated_latency(t0 + Duration::from_millis(100) + PROBE_TIMEOUT).is_none());
        });
    }

    #[test]
    fn test_estimated_latency_tracks_running_probe() {
        paused(async {
            let mut ping = PingMonitor::new(Some(Duration::from_millis(50)));
            let t0 = Instant::now();

            let probe = ping.maybe_probe(t0).unwrap();
            ping.on_keep_alive(&Frame::keep_alive(ECHO_CHANNEL_ID, probe.sequence), t0 + Duration::from_millis(10));

            ping.maybe_probe(t0 + Duration::from_millis(60)).unwrap();

            // the in-flight probe is older than the last round-trip, so its
            // age dominates the estimate
            assert_eq!(
                ping.estimated_latency(t0 + Duration::from_millis(90)),
                Some(Duration::from_millis(30))
            );
        });
    }

    #[test]
    fn test_peer_probe_is_echoed() {
        paused(async {
            let mut ping = PingMonitor::new(None);
            let now = Instant::now();

            let echo = ping.on_keep_alive(&Frame::keep_alive(PROBE_CHANNEL_ID, 42), now).unwrap();
            assert_eq!(echo.channel_id, ECHO_CHANNEL_ID);
            assert_eq!(echo.sequence, 42);
            assert_eq!(ping.last_seen_peer(), Some(now));
        });
    }

    #[test]
    fn test_stale_echo_is_ignored() {
        paused(async {
            let mut ping = PingMonitor::new(Some(Duration::from_millis(50)));
            let t0 = Instant::now();
            let probe = ping.maybe_probe(t0).unwrap();

            ping.on_keep_alive(&Frame::keep_alive(ECHO_CHANNEL_ID, probe.sequence.wrapping_add(1)), t0 + Duration::from_millis(5));
            assert!(ping.estimated_latency(t0 + Duration::from_millis(5)).is_none());
        });
    }
}
