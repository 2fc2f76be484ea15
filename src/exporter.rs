//! Export orchestration
//!
//! An export goes through these states:
//!
//! ```text
//! Validating -> DimensionsResolved -> EngineLaunching -> SessionOpen
//!   -> Authenticating (only with credentials)
//!   -> NavigatingAndWaiting (navigation, context wait and readiness gates in parallel)
//!   -> IdleBrowserWait -> Snapshotting -> Done
//! ```
//!
//! Any state may end in `Failed`, and every state from `EngineLaunching` on
//! may end in `TimedOut`. Validation problems fail before a browser is
//! launched. The deadline is fixed when the engine phase starts and bounds
//! everything after it: the launch (or the wait for the shared engine), the
//! session, the pipeline and the release. When it expires the caller gets
//! the timeout at once and the release finishes on its own task.

use crate::auth::authenticate;
use crate::chrome::ChromeLauncher;
use crate::config::{EngineOptions, LaunchMode};
use crate::context::wait_for_context;
use crate::deadline::{format_seconds, Deadline};
use crate::engine::{with_engine, with_session, Engine, EngineGuard, EngineLauncher, Session};
use crate::metrics::ExportMetrics;
use crate::payload::{ExportPayload, PayloadValidator, SchemaValidator};
use crate::readiness::{await_ready, wait_for_idle_browser};
use crate::{resolve_dimensions, Dimensions, ExportError, Tracer};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    Validating,
    DimensionsResolved,
    EngineLaunching,
    SessionOpen,
    Authenticating,
    NavigatingAndWaiting,
    IdleBrowserWait,
    Snapshotting,
    Done,
    TimedOut,
    Failed,
}

impl ExportState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExportState::Done | ExportState::TimedOut | ExportState::Failed)
    }

    /// Terminal state reached with `outcome`.
    pub fn settled<T>(outcome: &Result<T, ExportError>) -> Self {
        match outcome {
            Ok(_) => ExportState::Done,
            Err(e) if e.is_timeout() => ExportState::TimedOut,
            Err(_) => ExportState::Failed,
        }
    }
}

fn enter(tracer: &Tracer, state: ExportState) {
    debug!(export_id = tracer.export_id(), state = ?state, "export state");
}

/// Something that turns an unvalidated payload into a PDF.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentExporter: Send + Sync {
    async fn export(&self, payload: &Value, timeout_in_seconds: f64) -> Result<Vec<u8>, ExportError>;
}

pub struct Exporter {
    launcher: Arc<dyn EngineLauncher>,
    validator: Arc<dyn PayloadValidator>,
    mode: LaunchMode,
    shared: Mutex<Option<EngineGuard>>,
}

impl Exporter {
    pub fn new(launcher: Arc<dyn EngineLauncher>, mode: LaunchMode) -> Self {
        Self {
            launcher,
            validator: Arc::new(SchemaValidator),
            mode,
            shared: Mutex::new(None),
        }
    }

    /// Chromium-backed exporter, launch mode taken from `options`.
    pub fn from_options(options: &EngineOptions) -> Self {
        Self::new(
            Arc::new(ChromeLauncher::new(options.clone())),
            options.launch_mode,
        )
    }

    pub fn with_validator(mut self, validator: Arc<dyn PayloadValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn mode(&self) -> LaunchMode {
        self.mode
    }

    /// Launch the shared engine now instead of on the first export.
    pub async fn start(&self) -> Result<(), ExportError> {
        if self.mode == LaunchMode::Shared {
            self.shared_engine().await?;
        }
        Ok(())
    }

    /// Close the shared engine, if one is running.
    pub async fn shutdown(&self) {
        if let Some(guard) = self.shared.lock().await.take() {
            info!("Shutting down shared browser");
            guard.close().await;
        }
    }

    async fn shared_engine(&self) -> Result<Arc<dyn Engine>, ExportError> {
        let mut shared = self.shared.lock().await;
        if let Some(engine) = shared.as_ref().and_then(EngineGuard::engine) {
            return Ok(engine.clone());
        }

        let tracer = Tracer::new("shared-engine");
        let engine = tracer.step("launching browser", self.launcher.launch()).await?;
        ExportMetrics::record_engine_launch();
        *shared = Some(EngineGuard::new(engine.clone(), tracer));
        Ok(engine)
    }

    /// Export an already typed payload.
    pub async fn export_payload(
        &self,
        payload: &ExportPayload,
        timeout_in_seconds: f64,
    ) -> Result<Vec<u8>, ExportError> {
        let tracer = Tracer::for_new_export();
        observe(&tracer, Box::pin(self.run(payload, timeout_in_seconds, &tracer))).await
    }

    async fn run(
        &self,
        payload: &ExportPayload,
        timeout_in_seconds: f64,
        tracer: &Tracer,
    ) -> Result<Vec<u8>, ExportError> {
        let budget = Deadline::budget_from_seconds(timeout_in_seconds)?;
        let dimensions = resolve_dimensions(payload.paper.as_ref())?;
        enter(tracer, ExportState::DimensionsResolved);

        let message = format!(
            "Failed to perform the export under the given timeout of {} seconds.",
            format_seconds(budget)
        );

        enter(tracer, ExportState::EngineLaunching);
        let deadline = Deadline::after(budget);

        let export = async {
            match self.mode {
                LaunchMode::PerExport => {
                    with_engine(self.launcher.as_ref(), tracer, |engine| async move {
                        in_session(engine.as_ref(), payload, dimensions, &deadline, tracer).await
                    })
                    .await
                }
                LaunchMode::Shared => {
                    let engine = self.shared_engine().await?;
                    in_session(engine.as_ref(), payload, dimensions, &deadline, tracer).await
                }
            }
        };
        deadline.guard(Box::pin(export), message).await
    }
}

#[async_trait]
impl DocumentExporter for Exporter {
    /// Validate `payload`, then export it.
    async fn export(&self, payload: &Value, timeout_in_seconds: f64) -> Result<Vec<u8>, ExportError> {
        let tracer = Tracer::for_new_export();
        let export = async {
            enter(&tracer, ExportState::Validating);
            let payload = self.validator.parse(payload)?;
            self.run(&payload, timeout_in_seconds, &tracer).await
        };
        observe(&tracer, Box::pin(export)).await
    }
}

async fn observe<F>(tracer: &Tracer, export: F) -> Result<Vec<u8>, ExportError>
where
    F: std::future::Future<Output = Result<Vec<u8>, ExportError>>,
{
    let started_at = Instant::now();
    let outcome = tracer.step("PDF export", export).await;
    let elapsed = started_at.elapsed();

    let state = ExportState::settled(&outcome);
    enter(tracer, state);
    match &outcome {
        Ok(pdf) => info!(
            export_id = tracer.export_id(),
            bytes = pdf.len(),
            elapsed = ?elapsed,
            "Export completed"
        ),
        Err(e) => warn!(
            export_id = tracer.export_id(),
            kind = e.kind(),
            elapsed = ?elapsed,
            "Export failed: {}",
            e
        ),
    }
    ExportMetrics::record_export(elapsed, outcome.as_ref().map(|_| ()));

    outcome
}

async fn in_session(
    engine: &dyn Engine,
    payload: &ExportPayload,
    dimensions: Dimensions,
    deadline: &Deadline,
    tracer: &Tracer,
) -> Result<Vec<u8>, ExportError> {
    with_session(engine, tracer, |session| async move {
        enter(tracer, ExportState::SessionOpen);
        Box::pin(pipeline(session.as_ref(), payload, dimensions, deadline, tracer)).await
    })
    .await
}

async fn pipeline(
    session: &dyn Session,
    payload: &ExportPayload,
    dimensions: Dimensions,
    deadline: &Deadline,
    tracer: &Tracer,
) -> Result<Vec<u8>, ExportError> {
    if let Some(auth) = &payload.authentication {
        enter(tracer, ExportState::Authenticating);
        authenticate(session, auth, &payload.url, deadline, tracer).await?;
    }

    enter(tracer, ExportState::NavigatingAndWaiting);
    let wait_until = payload.wait_until();
    let goto_tracer = tracer.scoped("gotoPage");
    let navigation = goto_tracer.step("navigation", session.goto(&payload.url));
    let readiness = async {
        wait_for_context(session, deadline, tracer).await?;
        await_ready(session, dimensions, &wait_until, deadline, tracer).await
    };
    futures::try_join!(navigation, readiness)?;

    enter(tracer, ExportState::IdleBrowserWait);
    wait_for_idle_browser(session, deadline, tracer).await?;

    enter(tracer, ExportState::Snapshotting);
    tracer
        .scoped("generatePdf")
        .step("PDF generation", session.print_to_pdf(dimensions))
        .await
}

/// One-shot export: launch a browser, export `payload`, close the browser.
pub async fn export_document(
    payload: &Value,
    timeout_in_seconds: f64,
    engine_options: Option<EngineOptions>,
) -> Result<Vec<u8>, ExportError> {
    let options = engine_options.unwrap_or_default();
    let exporter = Exporter::new(
        Arc::new(ChromeLauncher::new(options)),
        LaunchMode::PerExport,
    );
    exporter.export(payload, timeout_in_seconds).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settled_states() {
        assert_eq!(ExportState::settled(&Ok(())), ExportState::Done);
        assert_eq!(
            ExportState::settled::<()>(&Err(ExportError::timeout("late"))),
            ExportState::TimedOut
        );
        assert_eq!(
            ExportState::settled::<()>(&Err(ExportError::Engine("crash".to_string()))),
            ExportState::Failed
        );
        assert!(ExportState::Done.is_terminal());
        assert!(!ExportState::Snapshotting.is_terminal());
    }
}
