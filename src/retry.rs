use std::time::Duration;

use tracing::warn;

/// What a single attempt of a retryable operation concluded.
#[derive(Debug)]
pub enum Attempt<T, E> {
    Done(T),
    /// Failed, but another attempt may succeed.
    Retry(E),
    /// Failed in a way another attempt cannot fix.
    Abort(E),
}

#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    Exhausted { attempts: u32, last: E },
    Aborted { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Aborted { attempt, .. } => *attempt,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted { error, .. } => error,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    sleep: Duration,
    sleeper: fn(Duration),
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, sleep: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            sleep,
            sleeper: std::thread::sleep,
        }
    }

    pub fn with_sleeper(mut self, sleeper: fn(Duration)) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn sleep(&self) -> Duration {
        self.sleep
    }

    /// Runs `op` until it is done, aborts, or `max_attempts` attempts have
    /// failed. The closure receives the 1-based attempt number. Sleeps block
    /// the calling thread.
    pub fn run<T, E, F>(&self, label: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Attempt<T, E>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Attempt::Done(value) => return Ok(value),
                Attempt::Abort(error) => return Err(RetryError::Aborted { attempt, error }),
                Attempt::Retry(last) => {
                    if attempt >= self.max_attempts {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last,
                        });
                    }
                    warn!(
                        "{label} was unsuccessful, retrying after {} seconds ({attempt} of {})",
                        self.sleep.as_secs(),
                        self.max_attempts
                    );
                    (self.sleeper)(self.sleep);
                    attempt += 1;
                }
            }
        }
    }
}
