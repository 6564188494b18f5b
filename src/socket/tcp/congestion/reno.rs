use crate::config::DEFAULT_MSS;

use super::Controller;

/// Slow start threshold before the first loss: the largest window a peer can advertise.
const INITIAL_SSTHRESH: usize = 65535;

#[derive(Debug)]
pub struct Reno {
    cwnd: usize,
    ssthresh: usize,
    mss: usize,
    /// Bytes acknowledged since the window last grew during congestion avoidance.
    bytes_acked: usize,
}

impl Reno {
    pub fn new() -> Self {
        Reno {
            cwnd: DEFAULT_MSS,
            ssthresh: INITIAL_SSTHRESH,
            mss: DEFAULT_MSS,
            bytes_acked: 0,
        }
    }

    fn halve(&mut self, flight_size: usize) {
        self.ssthresh = (flight_size / 2).max(2 * self.mss);
    }
}

impl Controller for Reno {
    fn window(&self) -> usize {
        self.cwnd
    }

    fn ssthresh(&self) -> usize {
        self.ssthresh
    }

    fn on_ack(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        if self.cwnd < self.ssthresh {
            // Slow start: one segment of growth per acknowledged segment.
            let segments = len.div_ceil(self.mss);
            self.cwnd = self.cwnd.saturating_add(segments * self.mss);
            tcp_trace!("reno: slow start cwnd={}", self.cwnd);
        } else {
            // Congestion avoidance: one segment per window's worth of acknowledged data.
            self.bytes_acked += len;
            if self.bytes_acked >= self.cwnd {
                self.bytes_acked -= self.cwnd;
                self.cwnd = self.cwnd.saturating_add(self.mss);
                tcp_trace!("reno: congestion avoidance cwnd={}", self.cwnd);
            }
        }
    }

    fn on_retransmit(&mut self, flight_size: usize) {
        self.halve(flight_size);
        self.cwnd = self.mss;
        self.bytes_acked = 0;
        tcp_trace!("reno: timeout ssthresh={} cwnd={}", self.ssthresh, self.cwnd);
    }

    fn on_duplicate_ack(&mut self, count: u8, flight_size: usize) {
        match count {
            3 => {
                self.halve(flight_size);
                self.cwnd = self.ssthresh + 3 * self.mss;
                self.bytes_acked = 0;
                tcp_trace!("reno: fast recovery ssthresh={} cwnd={}", self.ssthresh, self.cwnd);
            }
            n if n > 3 => self.cwnd = self.cwnd.saturating_add(self.mss),
            _ => (),
        }
    }

    fn on_recovery_exit(&mut self) {
        self.cwnd = self.ssthresh;
    }

    fn set_mss(&mut self, mss: usize) {
        self.mss = mss;
        self.cwnd = mss;
        self.ssthresh = self.ssthresh.max(2 * mss);
    }
}
