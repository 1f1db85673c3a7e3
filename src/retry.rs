use core::{fmt, time::Duration};

use crate::{
    error::{Error, Kind},
    path::SelectionPath,
    transport::Request,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `step * attempt`.
    Linear(Duration),
    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    pub fn delay(self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::Fixed(d) => d,
            Self::Linear(step) => step.saturating_mul(attempt),
            Self::Exponential { base, max } => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Linear(Duration::from_millis(1200)),
        }
    }
}

/// Bookkeeping for one retry round; dropped once the round ends.
#[derive(Debug, Default)]
pub struct Attempt {
    pub count: u32,
    pub last_error: Option<Error>,
}

/// A retry round that gave up.
#[derive(Debug)]
pub struct Failure {
    pub path: SelectionPath,
    pub what: &'static str,
    pub attempts: u32,
    pub cause: Error,
    pub request: Option<Request>,
}

impl Failure {
    pub const fn new(path: SelectionPath, what: &'static str, attempts: u32, cause: Error) -> Self {
        Self { path, what, attempts, cause, request: None }
    }

    #[must_use]
    pub fn with_request(mut self, request: Option<&Request>) -> Self {
        self.request = request.cloned();
        self
    }

    #[inline]
    pub fn kind(&self) -> Kind {
        self.cause.kind()
    }

    /// Whether the round ran out of attempts, as opposed to stopping on a non-retryable error.
    #[inline]
    pub fn exhausted(&self) -> bool {
        self.kind() == Kind::Transient
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed at [{}] after {} attempt(s) ({}): {}",
            self.what,
            self.path,
            self.attempts,
            self.kind(),
            self.cause
        )
    }
}

impl RetryPolicy {
    /// Runs `op` until it succeeds, fails for a non-transient reason, or the budget is spent.
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F>(&self, path: &SelectionPath, what: &'static str, mut op: F) -> Result<T, Failure>
    where
        F: AsyncFnMut(u32) -> Result<T, Error>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = Attempt::default();
        loop {
            attempt.count += 1;
            match op(attempt.count).await {
                Ok(value) => {
                    if let Some(e) = &attempt.last_error {
                        tracing::info!(target: "retry", "{what} at [{path}] succeeded on attempt {} after: {e}", attempt.count);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if !e.is_transient() || attempt.count >= max {
                        return Err(Failure::new(path.clone(), what, attempt.count, e));
                    }
                    let delay = self.backoff.delay(attempt.count);
                    tracing::warn!(
                        target: "retry",
                        "{what} at [{path}] attempt {}/{max} failed: {e}, retrying in {delay:?}",
                        attempt.count,
                    );
                    attempt.last_error = Some(e);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays() {
        let ms = Duration::from_millis;
        assert_eq!(Backoff::Fixed(ms(5)).delay(3), ms(5));
        assert_eq!(Backoff::Linear(ms(1200)).delay(2), ms(2400));
        let exp = Backoff::Exponential { base: ms(100), max: ms(500) };
        assert_eq!(exp.delay(1), ms(100));
        assert_eq!(exp.delay(3), ms(400));
        assert_eq!(exp.delay(4), ms(500));
        assert_eq!(exp.delay(60), ms(500));
    }

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy { max_attempts, backoff: Backoff::Fixed(Duration::ZERO) }
    }

    #[tokio::test]
    async fn transient_failures_are_bounded() {
        let mut calls = 0;
        let res: Result<(), _> = quick(3)
            .run(&SelectionPath::new(["2W"]), "select", async |_: u32| {
                calls += 1;
                Err(Error::Status(503))
            })
            .await;
        let failure = res.unwrap_err();
        assert_eq!(calls, 3);
        assert_eq!(failure.attempts, 3);
        assert!(failure.exhausted());
        assert!(failure.to_string().contains("[2W]"));
    }

    #[tokio::test]
    async fn structural_failures_stop_at_once() {
        let mut calls = 0;
        let res: Result<(), _> = quick(5)
            .run(&SelectionPath::root(), "options", async |_: u32| {
                calls += 1;
                Err(Error::OptionParse { field: "x".into() })
            })
            .await;
        assert_eq!(calls, 1);
        assert!(!res.unwrap_err().exhausted());
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let res = quick(3)
            .run(&SelectionPath::root(), "landing", async |attempt: u32| {
                if attempt < 2 { Err(Error::Status(500)) } else { Ok(attempt) }
            })
            .await;
        assert_eq!(res.unwrap(), 2);
    }
}
