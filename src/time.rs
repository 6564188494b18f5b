/*! Time structures.

The engine does not read a clock. Time is the number of protocol ticks delivered
through [`Interface::tick`](crate::iface::Interface::tick) since the interface was
created, and every timeout is expressed as a number of ticks.

 * [Instant] is a point in tick time.
 * [Duration] is a span of ticks.
*/

use core::{fmt, ops};

/// A point in time, counted in protocol ticks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant {
    ticks: u64,
}

impl Instant {
    pub const ZERO: Instant = Instant::from_ticks(0);

    /// Create a new `Instant` from a tick count.
    pub const fn from_ticks(ticks: u64) -> Instant {
        Instant { ticks }
    }

    /// The number of ticks elapsed since the origin.
    pub const fn total_ticks(&self) -> u64 {
        self.ticks
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "@{}", self.ticks)
    }
}

impl ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant::from_ticks(self.ticks + rhs.ticks as u64)
    }
}

impl ops::AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        self.ticks += rhs.ticks as u64;
    }
}

impl ops::Sub<Instant> for Instant {
    type Output = Duration;

    /// Saturates at zero if `rhs` is later than `self`.
    fn sub(self, rhs: Instant) -> Duration {
        let ticks = self.ticks.saturating_sub(rhs.ticks);
        Duration::from_ticks(u32::try_from(ticks).unwrap_or(u32::MAX))
    }
}

/// A relative amount of time, counted in protocol ticks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration {
    ticks: u32,
}

impl Duration {
    pub const ZERO: Duration = Duration::from_ticks(0);

    /// Create a new `Duration` from a tick count.
    pub const fn from_ticks(ticks: u32) -> Duration {
        Duration { ticks }
    }

    /// Create a new `Duration` of `secs` seconds at a rate of `hz` ticks per second.
    pub const fn from_secs(secs: u32, hz: u32) -> Duration {
        Duration::from_ticks(secs * hz)
    }

    /// The number of ticks in this duration.
    pub const fn total_ticks(&self) -> u32 {
        self.ticks
    }

    pub const fn is_zero(&self) -> bool {
        self.ticks == 0
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ticks", self.ticks)
    }
}

impl ops::Mul<u32> for Duration {
    type Output = Duration;

    fn mul(self, rhs: u32) -> Duration {
        Duration::from_ticks(self.ticks.saturating_mul(rhs))
    }
}
