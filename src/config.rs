//! Compile-time limits and the runtime protocol configuration.

use crate::socket::tcp::CongestionControl;
use crate::time::Duration;

/// Maximum number of routes the route table may hold.
pub const IFACE_MAX_ROUTE_COUNT: usize = 8;

/// Upper bound for the accept queue of a listening socket.
pub const MAX_BACKLOG: usize = 16;

/// The MSS assumed for a peer that did not announce one, per RFC 1122.
pub const DEFAULT_MSS: usize = 536;

/// Fixed-point shift applied to the smoothed RTT and its variance.
pub const SRTT_SHIFT: u32 = 3;

/// Protocol tunables of an interface and every connection it creates.
///
/// All timeouts are in ticks; the defaults assume `tick_hz` ticks per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Number of ticks per second delivered to [`Interface::tick`](crate::iface::Interface::tick).
    pub tick_hz: u32,
    /// Retransmission timeout used for data before any RTT sample was taken.
    pub rto_init: Duration,
    /// Retransmission timeout for a SYN or SYN|ACK.
    pub syn_rto_init: Duration,
    /// Floor for a computed retransmission timeout.
    pub rto_min: Duration,
    /// Ceiling for the retransmission and persist backoff.
    pub rto_max: Duration,
    /// Number of retransmissions after which a connection is aborted.
    pub max_retries: u8,
    /// Maximum segment lifetime. TIME-WAIT lasts twice as long.
    pub msl: Duration,
    /// How long an ACK for in-order data may be held back.
    pub delack: Duration,
    /// Capacity of the transmit ring buffer.
    pub snd_buffer_size: usize,
    /// Capacity of the receive ring buffer.
    pub rcv_buffer_size: usize,
    /// Default accept queue length of a listening socket.
    pub max_backlog: usize,
    /// First port handed out to sockets bound to port 0.
    pub ephemeral_port_base: u16,
    /// Whether Nagle's algorithm is enabled for new connections.
    pub nagle: bool,
    /// Congestion control algorithm for new connections.
    pub congestion: CongestionControl,
}

impl Default for Config {
    fn default() -> Config {
        const HZ: u32 = 10;
        Config {
            tick_hz: HZ,
            rto_init: Duration::from_secs(1, HZ),
            syn_rto_init: Duration::from_secs(15, HZ),
            rto_min: Duration::from_secs(1, HZ),
            rto_max: Duration::from_secs(64, HZ),
            max_retries: 5,
            msl: Duration::from_secs(30, HZ),
            delack: Duration::from_ticks(1),
            snd_buffer_size: 8192,
            rcv_buffer_size: 8192,
            max_backlog: 5,
            ephemeral_port_base: 49152,
            nagle: true,
            congestion: CongestionControl::Reno,
        }
    }
}

impl Config {
    pub fn with_rto_init(mut self, rto: Duration) -> Config {
        self.rto_init = rto;
        self
    }

    pub fn with_syn_rto_init(mut self, rto: Duration) -> Config {
        self.syn_rto_init = rto;
        self
    }

    pub fn with_rto_bounds(mut self, min: Duration, max: Duration) -> Config {
        self.rto_min = min;
        self.rto_max = max;
        self
    }

    pub fn with_max_retries(mut self, retries: u8) -> Config {
        self.max_retries = retries;
        self
    }

    pub fn with_msl(mut self, msl: Duration) -> Config {
        self.msl = msl;
        self
    }

    pub fn with_buffer_sizes(mut self, snd: usize, rcv: usize) -> Config {
        self.snd_buffer_size = snd;
        self.rcv_buffer_size = rcv;
        self
    }

    /// Set the default accept queue length, clamped to [`MAX_BACKLOG`].
    pub fn with_max_backlog(mut self, backlog: usize) -> Config {
        self.max_backlog = backlog.clamp(1, MAX_BACKLOG);
        self
    }

    pub fn with_nagle(mut self, enabled: bool) -> Config {
        self.nagle = enabled;
        self
    }

    pub fn with_congestion(mut self, congestion: CongestionControl) -> Config {
        self.congestion = congestion;
        self
    }

    /// Length of the TIME-WAIT quiet period.
    pub fn time_wait(&self) -> Duration {
        self.msl * 2
    }
}
