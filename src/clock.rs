use core::time::Duration;

use embedded_hal::timer::{self, CountDown};

/// Monotonic time source for the retry windows.
pub trait Clock {
    /// Time elapsed since an arbitrary fixed epoch, never decreasing
    fn now(&mut self) -> Duration;

    /// Called between two polls, a chance to yield the processor
    fn relax(&mut self) {}
}

/// Clock counting expiries of a periodic `CountDown` timer.
///
/// Resolution is one period, and `now` must be called at least once per period
/// or expiries are missed.
pub struct Periodic<T> {
    timer: T,
    period: Duration,
    elapsed: Duration,
}

impl<T: CountDown<Time = Duration> + timer::Periodic> Periodic<T> {
    pub fn new(mut timer: T, period: Duration) -> Self {
        timer.start(period);
        Self { timer, period, elapsed: Duration::ZERO }
    }

    pub fn release(self) -> T {
        self.timer
    }
}

impl<T: CountDown<Time = Duration> + timer::Periodic> Clock for Periodic<T> {
    fn now(&mut self) -> Duration {
        while self.timer.wait().is_ok() {
            self.elapsed += self.period;
        }
        self.elapsed
    }
}

#[cfg(feature = "std")]
pub mod std {
    use ::std::{thread, time};

    use core::time::Duration;

    pub struct Monotonic(time::Instant);

    impl Default for Monotonic {
        fn default() -> Self {
            Self(time::Instant::now())
        }
    }

    impl super::Clock for Monotonic {
        fn now(&mut self) -> Duration {
            self.0.elapsed()
        }

        fn relax(&mut self) {
            thread::yield_now()
        }
    }
}
