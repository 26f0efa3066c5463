// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded polling with pluggable backoff.
//!
//! Time comes from tokio, so tests can run the clock with
//! `tokio::time::pause`.

use backoff::backoff::{Backoff, Constant};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Fibonacci-shaped delays: 1, 1, 2, 3, 5, 8, ... times `unit`.
#[derive(Clone, Debug)]
pub struct FibonacciBackoff {
    unit: Duration,
    current: u32,
    next: u32,
}

impl FibonacciBackoff {
    pub fn new(unit: Duration) -> Self {
        Self { unit, current: 1, next: 1 }
    }
}

impl Backoff for FibonacciBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        let delay = self.unit.checked_mul(self.current)?;
        let following = self.current.checked_add(self.next)?;
        self.current = self.next;
        self.next = following;
        Some(delay)
    }

    fn reset(&mut self) {
        self.current = 1;
        self.next = 1;
    }
}

/// When polling gives up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryLimit {
    Attempts(usize),
    Deadline(Duration),
}

/// How long to wait between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackoffShape {
    Fixed(Duration),
    Fibonacci { unit: Duration },
}

impl BackoffShape {
    fn generator(self) -> Box<dyn Backoff + Send> {
        match self {
            BackoffShape::Fixed(interval) => Box::new(Constant::new(interval)),
            BackoffShape::Fibonacci { unit } => {
                Box::new(FibonacciBackoff::new(unit))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub limit: RetryLimit,
    pub backoff: BackoffShape,
}

impl RetryPolicy {
    pub fn fixed_with_deadline(interval: Duration, deadline: Duration) -> Self {
        Self {
            limit: RetryLimit::Deadline(deadline),
            backoff: BackoffShape::Fixed(interval),
        }
    }

    pub fn fibonacci_with_attempts(unit: Duration, attempts: usize) -> Self {
        Self {
            limit: RetryLimit::Attempts(attempts),
            backoff: BackoffShape::Fibonacci { unit },
        }
    }
}

impl fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.limit {
            RetryLimit::Attempts(n) => write!(f, "{n} attempts")?,
            RetryLimit::Deadline(d) => write!(f, "{}s deadline", d.as_secs())?,
        }
        match self.backoff {
            BackoffShape::Fixed(d) => write!(f, ", every {:?}", d),
            BackoffShape::Fibonacci { unit } => {
                write!(f, ", fibonacci backoff in units of {:?}", unit)
            }
        }
    }
}

/// The result of one check.
#[derive(Debug)]
pub enum CondCheckError<E> {
    /// Not there yet; try again after the next backoff.
    NotYet,
    /// Stop polling with this error.
    Failed(E),
}

#[derive(Debug, PartialEq, Eq)]
pub enum PollError<E> {
    /// The budget ran out after `attempts` checks.
    Exhausted { attempts: usize },
    Failed(E),
}

/// Calls `check` until it succeeds, fails permanently, or `policy`'s budget
/// runs out. There is no sleep after a success or after the final attempt.
///
/// Returns the value and the number of attempts it took.
pub async fn poll_until<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut check: F,
) -> Result<(T, usize), PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CondCheckError<E>>>,
{
    let mut backoff = policy.backoff.generator();
    let mut attempts = 0;
    match policy.limit {
        RetryLimit::Attempts(max) => {
            poll_loop(&mut check, backoff.as_mut(), Some(max), &mut attempts)
                .await
        }
        RetryLimit::Deadline(deadline) => {
            let result = tokio::time::timeout(
                deadline,
                poll_loop(&mut check, backoff.as_mut(), None, &mut attempts),
            )
            .await;
            match result {
                Ok(result) => result,
                Err(_elapsed) => Err(PollError::Exhausted { attempts }),
            }
        }
    }
}

async fn poll_loop<T, E, F, Fut>(
    check: &mut F,
    backoff: &mut (dyn Backoff + Send),
    max_attempts: Option<usize>,
    attempts: &mut usize,
) -> Result<(T, usize), PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CondCheckError<E>>>,
{
    loop {
        *attempts += 1;
        match check().await {
            Ok(value) => return Ok((value, *attempts)),
            Err(CondCheckError::Failed(error)) => {
                return Err(PollError::Failed(error))
            }
            Err(CondCheckError::NotYet) => {}
        }
        if max_attempts.is_some_and(|max| *attempts >= max) {
            return Err(PollError::Exhausted { attempts: *attempts });
        }
        let Some(delay) = backoff.next_backoff() else {
            return Err(PollError::Exhausted { attempts: *attempts });
        };
        tokio::time::sleep(delay).await;
    }
}
