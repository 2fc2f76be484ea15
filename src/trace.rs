//! Step instrumentation for one export
//!
//! Every phase of an export runs through [`Tracer::step`], which emits
//! `started`, `finished` and `failed` events inside a `step` span. A tracer is
//! created per export and handed down explicitly, so concurrent exports never
//! share logging state and their events can be told apart by `export_id`.

use crate::ExportError;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, debug_span, Instrument};

#[derive(Debug, Clone)]
pub struct Tracer {
    export_id: Arc<str>,
    scope: &'static str,
}

impl Tracer {
    pub fn new(export_id: impl Into<Arc<str>>) -> Self {
        Self {
            export_id: export_id.into(),
            scope: "export",
        }
    }

    /// A tracer with a fresh random export id.
    pub fn for_new_export() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    /// Same export, narrower scope (e.g. `authenticate`, `readiness`).
    pub fn scoped(&self, scope: &'static str) -> Self {
        Self {
            export_id: self.export_id.clone(),
            scope,
        }
    }

    pub fn export_id(&self) -> &str {
        &self.export_id
    }

    pub fn scope(&self) -> &'static str {
        self.scope
    }

    /// Run `operation` as the named step, forwarding its outcome unchanged.
    pub async fn step<T, F>(&self, name: &str, operation: F) -> Result<T, ExportError>
    where
        F: Future<Output = Result<T, ExportError>>,
    {
        let span = debug_span!(
            "step",
            export_id = %self.export_id,
            scope = self.scope,
            step = name
        );

        async move {
            let started_at = Instant::now();
            debug!("[{}] started", name);

            match operation.await {
                Ok(value) => {
                    debug!(elapsed = ?started_at.elapsed(), "[{}] finished", name);
                    Ok(value)
                }
                Err(e) => {
                    debug!(
                        elapsed = ?started_at.elapsed(),
                        error = %e,
                        kind = e.kind(),
                        "[{}] failed",
                        name
                    );
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Free-form debug event attached to this export and scope.
    pub fn note(&self, message: &str) {
        debug!(export_id = %self.export_id, scope = self.scope, "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_step_forwards_success() {
        let tracer = Tracer::new("export-1");
        let value = tracer.step("answer", async { Ok(42) }).await;
        assert_eq!(value.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_step_forwards_failure_unchanged() {
        let tracer = Tracer::new("export-1");
        let result: Result<(), _> = tracer
            .step("broken", async { Err(ExportError::Engine("boom".to_string())) })
            .await;

        match result {
            Err(ExportError::Engine(message)) => assert_eq!(message, "boom"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_scoped_keeps_export_id() {
        let tracer = Tracer::new("export-7");
        let scoped = tracer.scoped("authenticate");
        assert_eq!(scoped.export_id(), "export-7");
        assert_eq!(scoped.scope(), "authenticate");
        assert_eq!(tracer.scope(), "export");
    }

    #[test]
    fn test_new_exports_get_distinct_ids() {
        let a = Tracer::for_new_export();
        let b = Tracer::for_new_export();
        assert_ne!(a.export_id(), b.export_id());
    }
}
