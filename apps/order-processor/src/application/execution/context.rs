//! Execution context: cancellation, deadline and attempt metadata carried
//! through every call that can block.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ExecutionError;

/// Cancellation scope with an optional deadline.
///
/// Cloning shares the cancellation token; [`child`](Self::child) creates a
/// scope that is cancelled with its parent but can also be cancelled alone.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    caller: Option<String>,
    attempt: u32,
    final_attempt: bool,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// A root context with no deadline, first and final attempt.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
            caller: None,
            attempt: 1,
            final_attempt: true,
        }
    }

    /// A context cancelled together with `token`.
    #[must_use]
    pub fn with_cancellation(token: &CancellationToken) -> Self {
        Self {
            cancel: token.child_token(),
            ..Self::new()
        }
    }

    /// Tighten the deadline to at most `timeout` from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Tighten the deadline; an earlier existing deadline wins.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    /// Attach the identity of the caller.
    #[must_use]
    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    /// Record the attempt number. The attempt is final only if every
    /// enclosing retry loop is also on its final attempt.
    #[must_use]
    pub const fn with_attempt(mut self, attempt: u32, last: bool) -> Self {
        self.attempt = attempt;
        self.final_attempt = self.final_attempt && last;
        self
    }

    /// A child scope sharing deadline and metadata.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            caller: self.caller.clone(),
            attempt: self.attempt,
            final_attempt: self.final_attempt,
        }
    }

    /// A new root scope keeping this deadline and metadata but not this
    /// cancellation. Work handed to the worker pool runs in one, so it
    /// finishes during a drain after its submitter has gone.
    #[must_use]
    pub fn detached(&self) -> Self {
        Self {
            cancel: CancellationToken::new(),
            ..self.clone()
        }
    }

    /// Cancel this scope and its children.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether this scope has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The underlying token.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Caller identity.
    #[must_use]
    pub fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    /// 1-based attempt number.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether no further attempt will follow a failure.
    #[must_use]
    pub const fn is_final_attempt(&self) -> bool {
        self.final_attempt
    }

    /// Fail fast if the scope is already done.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if cancelled, `Timeout` if the deadline has passed.
    pub fn check(&self) -> Result<(), ExecutionError> {
        if self.is_cancelled() {
            return Err(ExecutionError::cancelled("execution context cancelled"));
        }
        if self.deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(ExecutionError::timeout("execution deadline exceeded"));
        }
        Ok(())
    }

    /// Run `fut`, abandoning it on cancellation or deadline.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or `Timeout` if the scope ends first, otherwise
    /// the future's own error.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, ExecutionError>
    where
        F: Future<Output = Result<T, ExecutionError>>,
    {
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                Err(ExecutionError::cancelled("execution context cancelled"))
            }
            () = expired => Err(ExecutionError::timeout("execution deadline exceeded")),
            result = fut => result,
        }
    }
}
