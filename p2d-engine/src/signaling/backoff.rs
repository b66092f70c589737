use crate::config::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential reconnect backoff with jitter.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            initial: config.initial_delay,
            max: config.max_delay,
            jitter: config.jitter,
            current: config.initial_delay,
        }
    }

    /// Next delay to wait before another attempt. Doubles up to the cap;
    /// jitter keeps a fleet of clients from reconnecting in lockstep.
    pub fn next(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);

        if self.jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + self.jitter * rand::thread_rng().gen_range(-1.0..=1.0);
        base.mul_f64(factor.max(0.0))
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
        }
    }

    #[test]
    fn doubles_to_cap() {
        let mut backoff = Backoff::new(&no_jitter());
        let delays: Vec<u64> = (0..7).map(|_| backoff.next().as_millis() as u64).collect();
        assert_eq!(delays, [500, 1000, 2000, 4000, 8000, 10000, 10000]);
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut backoff = Backoff::new(&no_jitter());
        backoff.next();
        backoff.next();
        backoff.reset();
        assert_eq!(backoff.next(), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_band() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            jitter: 0.25,
        };
        for _ in 0..100 {
            let delay = Backoff::new(&config).next();
            assert!(delay >= Duration::from_millis(750), "{delay:?}");
            assert!(delay <= Duration::from_millis(1250), "{delay:?}");
        }
    }
}
