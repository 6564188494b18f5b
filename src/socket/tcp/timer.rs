use crate::time::{Duration, Instant};

/// The four countdown timers of a connection.
///
/// Each timer is an expiry instant; it fires on the first tick at or past that instant.
/// The retransmission and persist timers are never armed at the same time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Timers {
    retransmit: Option<Instant>,
    /// Number of consecutive retransmission timeouts without forward progress.
    retries: u8,
    delayed_ack: Option<Instant>,
    persist: Option<Instant>,
    /// Interval until the next window probe; doubles after each probe.
    persist_backoff: Duration,
    time_wait: Option<Instant>,
}

impl Timers {
    pub(crate) fn set_for_retransmit(&mut self, timestamp: Instant, delay: Duration) {
        self.retransmit = Some(timestamp + delay);
        self.persist = None;
    }

    /// Arm the retransmission timer unless it is already running.
    pub(crate) fn ensure_retransmit(&mut self, timestamp: Instant, delay: Duration) {
        if self.retransmit.is_none() {
            self.set_for_retransmit(timestamp, delay)
        }
    }

    pub(crate) fn cancel_retransmit(&mut self) {
        self.retransmit = None;
        self.retries = 0;
    }

    #[cfg(test)]
    pub(crate) fn is_retransmit(&self) -> bool {
        self.retransmit.is_some()
    }

    pub(crate) fn should_retransmit(&self, timestamp: Instant) -> bool {
        matches!(self.retransmit, Some(expires_at) if timestamp >= expires_at)
    }

    /// Count one more timeout and return the total so far.
    pub(crate) fn note_retry(&mut self) -> u8 {
        self.retries = self.retries.saturating_add(1);
        self.retries
    }

    pub(crate) fn retries(&self) -> u8 {
        self.retries
    }

    pub(crate) fn reset_retries(&mut self) {
        self.retries = 0;
    }

    pub(crate) fn set_for_delayed_ack(&mut self, timestamp: Instant, delay: Duration) {
        self.delayed_ack = Some(timestamp + delay);
    }

    pub(crate) fn cancel_delayed_ack(&mut self) {
        self.delayed_ack = None;
    }

    pub(crate) fn is_delayed_ack(&self) -> bool {
        self.delayed_ack.is_some()
    }

    pub(crate) fn should_ack(&self, timestamp: Instant) -> bool {
        matches!(self.delayed_ack, Some(expires_at) if timestamp >= expires_at)
    }

    /// Start probing a zero window. Does nothing while a retransmission is pending or
    /// probing is already under way.
    pub(crate) fn set_for_persist(&mut self, timestamp: Instant, initial: Duration) {
        if self.retransmit.is_none() && self.persist.is_none() {
            self.persist_backoff = initial;
            self.persist = Some(timestamp + initial);
        }
    }

    /// Re-arm after a probe with twice the previous interval, at most `max`.
    pub(crate) fn back_off_persist(&mut self, timestamp: Instant, max: Duration) {
        self.persist_backoff = (self.persist_backoff * 2).min(max);
        self.persist = Some(timestamp + self.persist_backoff);
    }

    pub(crate) fn cancel_persist(&mut self) {
        self.persist = None;
    }

    pub(crate) fn is_persist(&self) -> bool {
        self.persist.is_some()
    }

    #[cfg(test)]
    pub(crate) fn persist_backoff(&self) -> Duration {
        self.persist_backoff
    }

    pub(crate) fn should_probe(&self, timestamp: Instant) -> bool {
        matches!(self.persist, Some(expires_at) if timestamp >= expires_at)
    }

    pub(crate) fn set_for_time_wait(&mut self, timestamp: Instant, delay: Duration) {
        self.time_wait = Some(timestamp + delay);
    }

    pub(crate) fn should_close(&self, timestamp: Instant) -> bool {
        matches!(self.time_wait, Some(expires_at) if timestamp >= expires_at)
    }

    #[cfg(test)]
    pub(crate) fn time_wait_expires_at(&self) -> Option<Instant> {
        self.time_wait
    }

    pub(crate) fn cancel_all(&mut self) {
        *self = Timers::default();
    }

    /// Query whether any timer is running.
    pub(crate) fn is_idle(&self) -> bool {
        self.retransmit.is_none()
            && self.delayed_ack.is_none()
            && self.persist.is_none()
            && self.time_wait.is_none()
    }
}
