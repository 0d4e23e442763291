use std::thread::sleep;
use std::time::Duration;

use tracing::debug;

/// Outcome of one attempt: whether another attempt may help, and what happened.
#[derive(Debug)]
pub enum Attempt<E> {
    Stop(Result<(), E>),
    Retry(Result<(), E>),
}

impl<E> Attempt<E> {
    pub fn should_retry(&self) -> bool {
        matches!(self, Self::Retry(_))
    }

    pub fn into_result(self) -> Result<(), E> {
        match self {
            Self::Stop(result) | Self::Retry(result) => result,
        }
    }
}

pub trait Retryable {
    type Error;

    fn attempt(&mut self) -> Attempt<Self::Error>;
}

impl<E, F> Retryable for F
where
    F: FnMut() -> Attempt<E>,
{
    type Error = E;

    fn attempt(&mut self) -> Attempt<E> {
        self()
    }
}

/// Runs a [`Retryable`] up to `max_attempts` times with a fixed pause in between.
///
/// Running out of attempts is not an error in itself: the last attempt's result is
/// returned as is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttemptStrategy {
    max_attempts: usize,
    delay: Duration,
}

impl AttemptStrategy {
    pub const fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
            delay,
        }
    }

    pub const fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub const fn delay(&self) -> Duration {
        self.delay
    }

    pub fn run<R>(&self, retryable: &mut R) -> Result<(), R::Error>
    where
        R: Retryable + ?Sized,
    {
        let mut attempt = 1;
        loop {
            let result = match retryable.attempt() {
                Attempt::Stop(result) => return result,
                Attempt::Retry(result) => result,
            };
            if attempt >= self.max_attempts {
                return result;
            }
            debug!(
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = self.delay.as_millis() as u64,
                "attempt failed, retrying"
            );
            attempt += 1;
            sleep(self.delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Attempt, AttemptStrategy};

    #[test]
    fn stops_after_max_attempts_and_returns_last_error() {
        let strategy = AttemptStrategy::new(3, Duration::ZERO);
        let mut calls = 0;
        let result = strategy.run(&mut || {
            calls += 1;
            Attempt::Retry(Err(format!("attempt {calls}")))
        });

        assert_eq!(calls, 3);
        assert_eq!(result, Err("attempt 3".to_owned()));
    }

    #[test]
    fn stops_immediately_when_not_retryable() {
        let strategy = AttemptStrategy::new(5, Duration::ZERO);
        let mut calls = 0;
        let result: Result<(), String> = strategy.run(&mut || {
            calls += 1;
            if calls == 2 {
                Attempt::Stop(Ok(()))
            } else {
                Attempt::Retry(Err("connection refused".to_owned()))
            }
        });

        assert_eq!(calls, 2);
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn final_error_is_returned_even_if_retry_was_requested() {
        let strategy = AttemptStrategy::new(1, Duration::from_secs(60));
        let result: Result<(), &str> = strategy.run(&mut || Attempt::Retry(Err("503")));
        assert_eq!(result, Err("503"));
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let strategy = AttemptStrategy::new(0, Duration::ZERO);
        assert_eq!(strategy.max_attempts(), 1);
        let mut calls = 0;
        let _: Result<(), ()> = strategy.run(&mut || {
            calls += 1;
            Attempt::Retry(Ok(()))
        });
        assert_eq!(calls, 1);
    }

    #[test]
    fn waits_between_attempts_but_not_after_the_last() {
        let strategy = AttemptStrategy::new(3, Duration::from_millis(20));
        let started = std::time::Instant::now();
        let _: Result<(), ()> = strategy.run(&mut || Attempt::Retry(Err(())));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(40));
        assert!(elapsed < Duration::from_millis(1_000));
    }
}
