use crate::config::SRTT_SHIFT;
use crate::time::{Duration, Instant};
use crate::wire::TcpSeqNumber;

/// Round-trip time estimator after Jacobson, in ticks.
///
/// `srtt` and `rttvar` are kept in fixed point, scaled by `1 << SRTT_SHIFT`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RttEstimator {
    /// true if we have made at least one rtt measurement.
    have_measurement: bool,
    /// Smoothed RTT, scaled.
    srtt: u32,
    /// RTT variance, scaled.
    rttvar: u32,
    /// Retransmission Time-Out
    rto: Duration,
    rto_min: Duration,
    rto_max: Duration,
    /// The segment being timed: when it left and the sequence number that acknowledges it.
    timestamp: Option<(Instant, TcpSeqNumber)>,
    max_seq_sent: Option<TcpSeqNumber>,
}

impl RttEstimator {
    pub(crate) fn new(rto_init: Duration, rto_min: Duration, rto_max: Duration) -> RttEstimator {
        RttEstimator {
            have_measurement: false,
            srtt: 0,   // ignored, will be overwritten on first measurement.
            rttvar: 0, // ignored, will be overwritten on first measurement.
            rto: rto_init,
            rto_min,
            rto_max,
            timestamp: None,
            max_seq_sent: None,
        }
    }

    pub(crate) fn retransmission_timeout(&self) -> Duration {
        self.rto
    }

    /// Smoothed round-trip time in ticks, if one was measured.
    pub(crate) fn srtt(&self) -> Option<u32> {
        self.have_measurement.then_some(self.srtt >> SRTT_SHIFT)
    }

    fn sample(&mut self, new_rtt: u32) {
        if self.have_measurement {
            let delta = new_rtt as i64 - (self.srtt >> SRTT_SHIFT) as i64;
            self.srtt = (self.srtt as i64 + delta).max(0) as u32;
            let rttvar = self.rttvar as i64;
            self.rttvar = (rttvar - (rttvar >> 2) + (delta.abs() << 1)) as u32;
        } else {
            self.have_measurement = true;
            self.srtt = new_rtt << SRTT_SHIFT;
            self.rttvar = new_rtt << (SRTT_SHIFT - 1);
        }

        let rto = (self.srtt >> SRTT_SHIFT) + 4 * (self.rttvar >> SRTT_SHIFT);
        self.rto = Duration::from_ticks(rto).clamp(self.rto_min, self.rto_max);

        tcp_trace!(
            "rtte: sample={} srtt={} rttvar={} rto={}",
            new_rtt,
            self.srtt,
            self.rttvar,
            self.rto
        );
    }

    /// Record that a segment ending just before `seq` left at `timestamp`.
    pub(crate) fn on_send(&mut self, timestamp: Instant, seq: TcpSeqNumber) {
        if self
            .max_seq_sent
            .map(|max_seq_sent| seq > max_seq_sent)
            .unwrap_or(true)
        {
            self.max_seq_sent = Some(seq);
            if self.timestamp.is_none() {
                self.timestamp = Some((timestamp, seq));
                tcp_trace!("rtte: sampling at seq={}", seq);
            }
        }
    }

    pub(crate) fn on_ack(&mut self, timestamp: Instant, seq: TcpSeqNumber) {
        if let Some((sent_timestamp, sent_seq)) = self.timestamp {
            if seq >= sent_seq {
                self.sample((timestamp - sent_timestamp).total_ticks());
                self.timestamp = None;
            }
        }
    }

    /// Forget the segment being timed. Retransmitted data never yields a sample (Karn).
    pub(crate) fn abort_sampling(&mut self) {
        if self.timestamp.is_some() {
            tcp_trace!("rtte: abort sampling due to retransmit");
        }
        self.timestamp = None;
    }

    /// Back off the timer after a retransmission timeout.
    pub(crate) fn on_retransmit(&mut self) {
        self.abort_sampling();
        self.rto = (self.rto * 2).min(self.rto_max);
        tcp_trace!("rtte: doubling rto to {}", self.rto);
    }
}
