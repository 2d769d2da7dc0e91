//! Retry Policies
//!
//! One policy type covers every retry site: price fetches, balance
//! probes, and the chat reconnect loop. Callers pick the attempt budget
//! and backoff shape; the policy owns the sleeping.

use std::time::Duration;

/// Delay shape between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every attempt.
    Fixed(Duration),
    /// `base * 2^attempt`, clamped to `cap`.
    Exponential { base: Duration, cap: Duration },
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

/// What a bounded retry loop produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// An attempt satisfied the acceptance predicate.
    Accepted(T),
    /// Budget ran out. Carries the last observation, if any attempt got
    /// one at all; balance reconciliation needs that final reading.
    Exhausted(Option<T>),
}

impl<T> RetryOutcome<T> {
    pub fn into_inner(self) -> Option<T> {
        match self {
            RetryOutcome::Accepted(v) => Some(v),
            RetryOutcome::Exhausted(v) => v,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { base, cap },
        }
    }

    /// Delay to sleep after the given zero-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, cap } => {
                let factor = 2u32.saturating_pow(attempt);
                cap.min(base.saturating_mul(factor))
            }
        }
    }

    /// Run `op` until it returns `Ok`, sleeping between attempts. Returns
    /// the last error once the budget is spent.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt + 1 >= self.max_attempts {
                        return Err(err);
                    }
                    tokio::time::sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Run `op` until an `Ok` value satisfies `accept`. Errors and
    /// rejected values both consume an attempt. The exhausted case keeps
    /// the last value seen so the caller can act on it.
    pub async fn run_until<T, E, F, Fut, A>(&self, mut op: F, accept: A) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        A: Fn(&T) -> bool,
    {
        let mut last = None;
        for attempt in 0..self.max_attempts {
            if let Ok(value) = op().await {
                if accept(&value) {
                    return RetryOutcome::Accepted(value);
                }
                last = Some(value);
            }
            if attempt + 1 < self.max_attempts {
                tokio::time::sleep(self.delay_for(attempt)).await;
            }
        }
        RetryOutcome::Exhausted(last)
    }
}
