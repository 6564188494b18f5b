use super::CongestionControl;

pub(super) mod no_control;

pub(super) mod reno;

/// The seam between the output engine and a congestion control algorithm.
///
/// All amounts are in bytes; `flight_size` is the amount of data sent but not yet
/// acknowledged at the time of the call.
#[allow(unused_variables)]
pub(super) trait Controller {
    /// Returns the number of bytes that may be in flight.
    fn window(&self) -> usize;

    /// Returns the slow start threshold.
    fn ssthresh(&self) -> usize {
        usize::MAX
    }

    /// `len` previously unacknowledged bytes were acknowledged.
    fn on_ack(&mut self, len: usize) {}

    /// The retransmission timer expired.
    fn on_retransmit(&mut self, flight_size: usize) {}

    /// A duplicate acknowledgement arrived; `count` is the number seen in a row.
    fn on_duplicate_ack(&mut self, count: u8, flight_size: usize) {}

    /// A new acknowledgement ended fast recovery.
    fn on_recovery_exit(&mut self) {}

    /// Set the maximum segment size.
    fn set_mss(&mut self, mss: usize) {}
}

#[derive(Debug)]
pub(super) enum AnyController {
    None(no_control::NoControl),
    Reno(reno::Reno),
}

impl AnyController {
    /// Create the controller for `algorithm`, sized for segments of `mss` bytes.
    pub fn new(algorithm: CongestionControl, mss: usize) -> Self {
        let mut controller = match algorithm {
            CongestionControl::None => AnyController::None(no_control::NoControl),
            CongestionControl::Reno => AnyController::Reno(reno::Reno::new()),
        };
        controller.inner_mut().set_mss(mss);
        controller
    }

    pub fn algorithm(&self) -> CongestionControl {
        match self {
            AnyController::None(_) => CongestionControl::None,
            AnyController::Reno(_) => CongestionControl::Reno,
        }
    }

    #[inline]
    pub fn inner_mut(&mut self) -> &mut dyn Controller {
        match self {
            AnyController::None(n) => n,
            AnyController::Reno(r) => r,
        }
    }

    #[inline]
    pub fn inner(&self) -> &dyn Controller {
        match self {
            AnyController::None(n) => n,
            AnyController::Reno(r) => r,
        }
    }
}
