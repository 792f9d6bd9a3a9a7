use std::fmt;
use std::ops::Add;
use std::time::Duration;

/// Signed shift applied to timeline positions. Positions never go below zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOffset {
    nanos: i128,
}

impl TimeOffset {
    pub const ZERO: TimeOffset = TimeOffset { nanos: 0 };

    pub fn from_millis(ms: i64) -> Self {
        Self {
            nanos: i128::from(ms) * 1_000_000,
        }
    }

    /// `to - from`
    pub fn between(from: Duration, to: Duration) -> Self {
        Self {
            nanos: to.as_nanos() as i128 - from.as_nanos() as i128,
        }
    }

    pub fn abs(self) -> Self {
        Self {
            nanos: self.nanos.abs(),
        }
    }

    pub fn is_zero(self) -> bool {
        self.nanos == 0
    }

    pub fn as_millis(self) -> i128 {
        self.nanos / 1_000_000
    }

    /// Shift `position`, saturating at zero.
    pub fn apply(self, position: Duration) -> Duration {
        let shifted = position.as_nanos() as i128 + self.nanos;
        if shifted <= 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(u64::try_from(shifted).unwrap_or(u64::MAX))
    }
}

impl Add for TimeOffset {
    type Output = TimeOffset;

    fn add(self, rhs: TimeOffset) -> TimeOffset {
        TimeOffset {
            nanos: self.nanos + rhs.nanos,
        }
    }
}

impl fmt::Display for TimeOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.as_millis())
    }
}
