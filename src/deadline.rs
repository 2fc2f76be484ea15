//! Deadline handling
//!
//! An export gets exactly one [`Deadline`], fixed when the engine phase
//! starts. Every wait below it is bounded by the time remaining until that
//! instant rather than by a fresh timeout of its own.

use crate::ExportError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started_at: Instant,
    budget: Duration,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            budget,
        }
    }

    /// Checks that `timeout_in_seconds` is a strictly positive, finite amount.
    pub fn budget_from_seconds(timeout_in_seconds: f64) -> Result<Duration, ExportError> {
        if !timeout_in_seconds.is_finite() || timeout_in_seconds <= 0.0 {
            return Err(ExportError::InvalidTimeout(timeout_in_seconds.to_string()));
        }
        Duration::try_from_secs_f64(timeout_in_seconds)
            .map_err(|_| ExportError::InvalidTimeout(timeout_in_seconds.to_string()))
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn expires_at(&self) -> Instant {
        self.started_at + self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at().saturating_duration_since(Instant::now())
    }

    /// Race `operation` against this deadline.
    ///
    /// On expiry the operation future is dropped, which abandons whatever it
    /// was awaiting; requests already sent to the browser are not recalled.
    pub async fn guard<T, F>(&self, operation: F, message: impl Into<String>) -> Result<T, ExportError>
    where
        F: Future<Output = Result<T, ExportError>>,
    {
        match timeout_at(self.expires_at(), operation).await {
            Ok(result) => result,
            Err(_) => Err(timeout_error(message.into())),
        }
    }
}

/// Race `operation` against a relative `budget`.
pub async fn guard<T, F>(
    operation: F,
    budget: Duration,
    message: impl Into<String>,
) -> Result<T, ExportError>
where
    F: Future<Output = Result<T, ExportError>>,
{
    match timeout(budget, operation).await {
        Ok(result) => result,
        Err(_) => Err(timeout_error(message.into())),
    }
}

fn timeout_error(message: String) -> ExportError {
    tracing::debug!("{}", message);
    ExportError::timeout(message)
}

/// Formats a budget the way error messages quote it, e.g. `7` or `0.5`.
pub fn format_seconds(budget: Duration) -> String {
    let seconds = budget.as_secs_f64();
    if seconds.fract() == 0.0 {
        format!("{}", seconds as u64)
    } else {
        format!("{seconds}")
    }
}
