//! Monotonic time and rate/size value types.
//!
//! All times inside the congestion-control core are monotonic microseconds
//! since an arbitrary epoch fixed at process start. `Timestamp` is an
//! absolute point, `TimeDelta` a signed duration; both carry first-class
//! plus/minus-infinity values so call sites don't need sentinel integers.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

const PLUS_INFINITY_US: i64 = i64::MAX;
const MINUS_INFINITY_US: i64 = i64::MIN;

/// An absolute point in monotonic time, in microseconds.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_micros(us: i64) -> Self {
        Timestamp(us)
    }

    pub fn from_millis(ms: i64) -> Self {
        Timestamp(ms.saturating_mul(1_000))
    }

    pub const fn plus_infinity() -> Self {
        Timestamp(PLUS_INFINITY_US)
    }

    pub const fn minus_infinity() -> Self {
        Timestamp(MINUS_INFINITY_US)
    }

    pub fn is_infinite(self) -> bool {
        self.0 == PLUS_INFINITY_US || self.0 == MINUS_INFINITY_US
    }

    pub fn is_finite(self) -> bool {
        !self.is_infinite()
    }

    pub fn micros(self) -> i64 {
        self.0
    }

    pub fn millis(self) -> i64 {
        self.0 / 1_000
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == PLUS_INFINITY_US {
            write!(f, "Timestamp(+inf)")
        } else if self.0 == MINUS_INFINITY_US {
            write!(f, "Timestamp(-inf)")
        } else {
            write!(f, "Timestamp({}us)", self.0)
        }
    }
}

impl Sub for Timestamp {
    type Output = TimeDelta;
    fn sub(self, rhs: Timestamp) -> TimeDelta {
        if self.0 == PLUS_INFINITY_US || rhs.0 == MINUS_INFINITY_US {
            return TimeDelta::plus_infinity();
        }
        if self.0 == MINUS_INFINITY_US || rhs.0 == PLUS_INFINITY_US {
            return TimeDelta::minus_infinity();
        }
        TimeDelta(self.0 - rhs.0)
    }
}

impl Add<TimeDelta> for Timestamp {
    type Output = Timestamp;
    fn add(self, rhs: TimeDelta) -> Timestamp {
        if self.is_infinite() || rhs.is_infinite() {
            return if rhs.0 < 0 || self.0 == MINUS_INFINITY_US {
                Timestamp::minus_infinity()
            } else {
                Timestamp::plus_infinity()
            };
        }
        Timestamp(self.0 + rhs.0)
    }
}

impl Sub<TimeDelta> for Timestamp {
    type Output = Timestamp;
    fn sub(self, rhs: TimeDelta) -> Timestamp {
        self + (-rhs)
    }
}

/// A signed duration, in microseconds.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeDelta(i64);

impl TimeDelta {
    pub const fn from_micros(us: i64) -> Self {
        TimeDelta(us)
    }

    pub fn from_millis(ms: i64) -> Self {
        TimeDelta(ms.saturating_mul(1_000))
    }

    pub fn from_seconds(s: f64) -> Self {
        TimeDelta((s * 1_000_000.0) as i64)
    }

    pub const fn zero() -> Self {
        TimeDelta(0)
    }

    pub const fn plus_infinity() -> Self {
        TimeDelta(PLUS_INFINITY_US)
    }

    pub const fn minus_infinity() -> Self {
        TimeDelta(MINUS_INFINITY_US)
    }

    pub fn is_infinite(self) -> bool {
        self.0 == PLUS_INFINITY_US || self.0 == MINUS_INFINITY_US
    }

    pub fn micros(self) -> i64 {
        self.0
    }

    pub fn millis(self) -> i64 {
        self.0 / 1_000
    }

    pub fn seconds_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }
}

impl fmt::Debug for TimeDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == PLUS_INFINITY_US {
            write!(f, "TimeDelta(+inf)")
        } else if self.0 == MINUS_INFINITY_US {
            write!(f, "TimeDelta(-inf)")
        } else {
            write!(f, "TimeDelta({}us)", self.0)
        }
    }
}

impl Neg for TimeDelta {
    type Output = TimeDelta;
    fn neg(self) -> TimeDelta {
        if self.0 == PLUS_INFINITY_US {
            TimeDelta::minus_infinity()
        } else if self.0 == MINUS_INFINITY_US {
            TimeDelta::plus_infinity()
        } else {
            TimeDelta(-self.0)
        }
    }
}

impl Add for TimeDelta {
    type Output = TimeDelta;
    fn add(self, rhs: TimeDelta) -> TimeDelta {
        if self.is_infinite() || rhs.is_infinite() {
            return if self.0 == PLUS_INFINITY_US || rhs.0 == PLUS_INFINITY_US {
                TimeDelta::plus_infinity()
            } else {
                TimeDelta::minus_infinity()
            };
        }
        TimeDelta(self.0 + rhs.0)
    }
}

impl Sub for TimeDelta {
    type Output = TimeDelta;
    fn sub(self, rhs: TimeDelta) -> TimeDelta {
        self + (-rhs)
    }
}

impl std::ops::Mul<f64> for TimeDelta {
    type Output = TimeDelta;
    fn mul(self, rhs: f64) -> TimeDelta {
        TimeDelta::from_micros((self.micros() as f64 * rhs) as i64)
    }
}

impl AddAssign for TimeDelta {
    fn add_assign(&mut self, rhs: TimeDelta) {
        *self = *self + rhs;
    }
}

impl SubAssign for TimeDelta {
    fn sub_assign(&mut self, rhs: TimeDelta) {
        *self = *self - rhs;
    }
}

/// A data rate in bits per second.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct DataRate(u64);

impl DataRate {
    pub const fn from_bps(bps: u64) -> Self {
        DataRate(bps)
    }

    pub fn from_kbps(kbps: u64) -> Self {
        DataRate(kbps.saturating_mul(1_000))
    }

    pub const fn zero() -> Self {
        DataRate(0)
    }

    pub fn bps(self) -> u64 {
        self.0
    }

    pub fn kbps(self) -> f64 {
        self.0 as f64 / 1_000.0
    }

    pub fn clamp(self, lo: DataRate, hi: DataRate) -> DataRate {
        DataRate(self.0.clamp(lo.0, hi.0))
    }
}

impl std::ops::Mul<f64> for DataRate {
    type Output = DataRate;
    fn mul(self, rhs: f64) -> DataRate {
        DataRate(((self.0 as f64) * rhs).max(0.0) as u64)
    }
}

impl Add for DataRate {
    type Output = DataRate;
    fn add(self, rhs: DataRate) -> DataRate {
        DataRate(self.0 + rhs.0)
    }
}

/// A size in bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct DataSize(u64);

impl DataSize {
    pub const fn from_bytes(bytes: u64) -> Self {
        DataSize(bytes)
    }

    pub const fn zero() -> Self {
        DataSize(0)
    }

    pub fn bytes(self) -> u64 {
        self.0
    }
}

impl Add for DataSize {
    type Output = DataSize;
    fn add(self, rhs: DataSize) -> DataSize {
        DataSize(self.0 + rhs.0)
    }
}

/// `rate * duration = size`, rounding down.
impl std::ops::Mul<TimeDelta> for DataRate {
    type Output = DataSize;
    fn mul(self, rhs: TimeDelta) -> DataSize {
        let bits = (self.0 as i128 * rhs.micros() as i128) / 1_000_000;
        DataSize((bits / 8).max(0) as u64)
    }
}
