//! Resilient request execution for an unstable upstream API.
//!
//! The platform's API surface is unofficial and its code paths differ in
//! reliability across versions. [`Executor::execute`] runs one operation and
//! normalizes its failure into [`ExecError`]. [`Executor::execute_with_fallback`]
//! runs an ordered list of [`Strategy`] values, each an alternative
//! implementation of the same logical call ordered from most structured to
//! most primitive, and stops at the first success.
//!
//! The executor never retries on its own schedule. Backoff and cooldown are
//! the caller's responsibility.
//!
//! # Usage
//!
//! ```rust,ignore
//! let token = executor
//!     .execute_with_fallback(
//!         vec![
//!             Strategy::new("typed", || client.auth_token()),
//!             Strategy::new("raw", || client.raw_auth_token()),
//!         ],
//!         "pipeline-token",
//!     )
//!     .await?;
//! ```

mod error;

pub use error::ExecError;

use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type StrategyFn<'a, T> = Box<dyn FnOnce() -> BoxFuture<'a, Result<T, ExecError>> + Send + 'a>;

/// One named implementation of a logical remote operation.
pub struct Strategy<'a, T> {
    name: &'static str,
    run: StrategyFn<'a, T>,
}

impl<'a, T: 'a> Strategy<'a, T> {
    pub fn new<F, Fut>(name: &'static str, operation: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<T, ExecError>> + Send + 'a,
    {
        Self {
            name,
            run: Box::new(move || Box::pin(operation())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> std::fmt::Debug for Strategy<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy").field("name", &self.name).finish()
    }
}

/// Counters describing executor activity since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecStats {
    /// Operations started (single calls and fallback chains).
    pub calls: u64,
    /// Operations that ended in failure.
    pub failures: u64,
    /// Individual strategies that failed inside fallback chains.
    pub strategy_failures: u64,
    /// Fallback chains that succeeded on a strategy other than the first.
    pub fallback_successes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicU64,
    failures: AtomicU64,
    strategy_failures: AtomicU64,
    fallback_successes: AtomicU64,
}

/// Control-flow combinator for remote operations. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    counters: Arc<Counters>,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs a single operation, converting its error into [`ExecError`].
    ///
    /// `correlation_key` identifies the logical call in logs.
    pub async fn execute<T, E, Fut>(&self, operation: Fut, correlation_key: &str) -> Result<T, ExecError>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Into<ExecError>,
    {
        self.counters.calls.fetch_add(1, Ordering::Relaxed);
        match operation.await {
            Ok(value) => Ok(value),
            Err(e) => {
                let err = e.into();
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = correlation_key, error = %err, "remote operation failed");
                Err(err)
            }
        }
    }

    /// Tries each strategy in order until one succeeds.
    ///
    /// Every intermediate failure is logged. If all fail, the result is
    /// [`ExecError::StrategyExhausted`] wrapping the last strategy's error.
    pub async fn execute_with_fallback<T>(
        &self,
        strategies: Vec<Strategy<'_, T>>,
        correlation_key: &str,
    ) -> Result<T, ExecError> {
        self.counters.calls.fetch_add(1, Ordering::Relaxed);

        if strategies.is_empty() {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            return Err(ExecError::NoStrategies);
        }

        let total = strategies.len();
        let mut last_error = None;

        for (index, strategy) in strategies.into_iter().enumerate() {
            let name = strategy.name;
            match (strategy.run)().await {
                Ok(value) => {
                    if index > 0 {
                        self.counters
                            .fallback_successes
                            .fetch_add(1, Ordering::Relaxed);
                        tracing::info!(
                            key = correlation_key,
                            strategy = name,
                            attempt = index + 1,
                            "fallback strategy succeeded"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    self.counters
                        .strategy_failures
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        key = correlation_key,
                        strategy = name,
                        attempt = index + 1,
                        of = total,
                        error = %err,
                        "strategy failed"
                    );
                    last_error = Some(err);
                }
            }
        }

        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        let last = last_error.unwrap_or(ExecError::NoStrategies);
        tracing::error!(key = correlation_key, attempts = total, "all strategies failed");
        Err(ExecError::StrategyExhausted {
            attempts: total,
            last: Box::new(last),
        })
    }

    pub fn stats(&self) -> ExecStats {
        ExecStats {
            calls: self.counters.calls.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            strategy_failures: self.counters.strategy_failures.load(Ordering::Relaxed),
            fallback_successes: self.counters.fallback_successes.load(Ordering::Relaxed),
        }
    }
}
