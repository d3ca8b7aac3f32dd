use rand::{Rng, SeedableRng, rngs::StdRng};
use std::time::Duration;

/// Exponential backoff with jitter
///
/// See <https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/>
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub init_backoff: Duration,
    pub max_backoff: Duration,
    pub base: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            base: 3.,
        }
    }
}

/// [`Backoff`] can be created from a [`BackoffConfig`]
///
/// Consecutive calls to [`Backoff::next`] will return the next backoff interval
///
#[derive(Debug)]
pub struct Backoff<R> {
    init_backoff: f64,
    next_backoff_secs: f64,
    max_backoff_secs: f64,
    base: f64,
    rng: R,
}

impl Backoff<StdRng> {
    /// Create a new [`Backoff`] from the provided [`BackoffConfig`]
    ///
    /// Seeded from the thread-local generator, the result is `Send`.
    pub fn new(config: &BackoffConfig) -> Self {
        Self::new_with_rng(config, StdRng::from_rng(&mut rand::rng()))
    }
}

impl<R: Rng> Backoff<R> {
    pub fn new_with_rng(config: &BackoffConfig, rng: R) -> Self {
        let init_backoff = config.init_backoff.as_secs_f64();
        Self {
            init_backoff,
            next_backoff_secs: init_backoff,
            max_backoff_secs: config.max_backoff.as_secs_f64(),
            base: config.base,
            rng,
        }
    }

    /// Returns the next backoff duration to wait for
    pub fn next(&mut self) -> Duration {
        let upper = self.next_backoff_secs * self.base;
        let next_backoff = if upper > self.init_backoff {
            self.max_backoff_secs
                .min(self.rng.random_range(self.init_backoff..upper))
        } else {
            self.init_backoff
        };
        Duration::from_secs_f64(std::mem::replace(&mut self.next_backoff_secs, next_backoff))
    }

    /// Start over from the initial interval, e.g. after a connection succeeded.
    pub fn reset(&mut self) {
        self.next_backoff_secs = self.init_backoff;
    }
}
