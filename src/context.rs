//! Waiting for a scriptable page
//!
//! Right after a navigation starts the page may have no execution context at
//! all, and evaluating anything fails with a transient driver error. The
//! waiter probes the page until an evaluation succeeds, backing off briefly
//! between attempts, and gives up only when the export deadline runs out.

use crate::deadline::{guard, Deadline};
use crate::engine::Session;
use crate::metrics::ExportMetrics;
use crate::{ExportError, Tracer};
use std::time::Duration;
use tokio::time::sleep;

/// Backoff between probes. There is no attempt cap; the deadline bounds the loop.
#[derive(Debug, Clone, Copy)]
pub struct ContextRetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for ContextRetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(80),
            backoff_multiplier: 2.0,
        }
    }
}

impl ContextRetryPolicy {
    /// Delay before retry number `attempt` (zero based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.min(16) as i32);
        let delay = self.initial_delay.as_nanos() as f64 * factor;
        Duration::from_nanos(delay.min(self.max_delay.as_nanos() as f64) as u64)
    }
}

const PROBE_EXPRESSION: &str = "1 + 1";

/// Wait until the page can evaluate scripts, bounded by `deadline`.
pub async fn wait_for_context(
    session: &dyn Session,
    deadline: &Deadline,
    tracer: &Tracer,
) -> Result<(), ExportError> {
    wait_for_context_with(session, deadline, ContextRetryPolicy::default(), tracer).await
}

pub async fn wait_for_context_with(
    session: &dyn Session,
    deadline: &Deadline,
    policy: ContextRetryPolicy,
    tracer: &Tracer,
) -> Result<(), ExportError> {
    let remaining = deadline.remaining();
    let message = format!(
        "Failed to wait for evaluation context under the given timeout of {} milliseconds.",
        remaining.as_millis()
    );

    let probe = async {
        let mut attempt = 0u32;
        loop {
            match session.evaluate(PROBE_EXPRESSION).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_transient() => {
                    ExportMetrics::record_context_retry();
                    tracer.note(&format!("no execution context yet (attempt {}): {}", attempt + 1, e));
                    sleep(policy.delay_for(attempt)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => return Err(e),
            }
        }
    };

    tracer
        .step("waiting for evaluation context", guard(probe, remaining, message))
        .await
}
