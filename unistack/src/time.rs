//! Time as seen by the stack.
//!
//! There is no clock of its own. Every entry point that depends on time takes the current
//! [`Instant`] from the tick source of the core running the stack, and every protocol timer is an
//! [`Expiration`].
//!
//! [`Instant`]: struct.Instant.html
//! [`Expiration`]: enum.Expiration.html
use core::{fmt, ops};
pub use core::time::Duration;

/// A point on a monotonic millisecond clock with an arbitrary epoch, such as boot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Instant {
    pub millis: i64,
}

/// A deadline that may be absent.
///
/// Deadlines sort before `Never`, so the next timer to fire is the minimum over all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Expiration {
    When(Instant),
    Never,
}

impl Instant {
    pub fn from_millis<T: Into<i64>>(millis: T) -> Instant {
        Instant { millis: millis.into() }
    }

    pub fn from_secs<T: Into<i64>>(secs: T) -> Instant {
        Instant { millis: secs.into() * 1000 }
    }

    pub fn total_millis(&self) -> i64 {
        self.millis
    }

    /// The time elapsed since `earlier`, zero if `earlier` lies in the future.
    pub fn saturating_duration_since(&self, earlier: Instant) -> Duration {
        Duration::from_millis(self.millis.saturating_sub(earlier.millis).max(0) as u64)
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:03}s", self.millis / 1000, self.millis % 1000)
    }
}

impl ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(mut self, rhs: Duration) -> Instant {
        self += rhs;
        self
    }
}

impl ops::AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        self.millis += rhs.as_millis() as i64;
    }
}

impl ops::Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Instant {
        Instant { millis: self.millis - rhs.as_millis() as i64 }
    }
}

impl Expiration {
    /// Whether the deadline is at or before `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self {
            Expiration::When(deadline) => *deadline <= now,
            Expiration::Never => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        *self != Expiration::Never
    }
}

impl Default for Expiration {
    fn default() -> Self {
        Expiration::Never
    }
}

impl From<Option<Instant>> for Expiration {
    fn from(deadline: Option<Instant>) -> Self {
        deadline.map_or(Expiration::Never, Expiration::When)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn instant_ops() {
        assert_eq!(Instant::from_millis(4) + Duration::from_millis(6), Instant::from_millis(10));
        assert_eq!(Instant::from_millis(7) - Duration::from_millis(5), Instant::from_millis(2));
    }

    #[test]
    fn instant_display() {
        assert_eq!(format!("{}", Instant::from_millis(5674)), "5.674s");
        assert_eq!(format!("{}", Instant::from_millis(5002)), "5.002s");
    }

    #[test]
    fn saturating_since() {
        let early = Instant::from_millis(100);
        let late = Instant::from_millis(350);
        assert_eq!(late.saturating_duration_since(early), Duration::from_millis(250));
        assert_eq!(early.saturating_duration_since(late), Duration::from_millis(0));
    }

    #[test]
    fn expiration_order() {
        let soon = Expiration::When(Instant::from_millis(10));
        let later = Expiration::When(Instant::from_millis(20));
        assert!(soon < later);
        assert!(later < Expiration::Never);
        assert_eq!(soon.min(Expiration::Never), soon);
        assert!(soon.is_expired(Instant::from_millis(10)));
        assert!(!later.is_expired(Instant::from_millis(10)));
        assert!(!Expiration::Never.is_expired(Instant::from_millis(i64::max_value())));
    }
}
