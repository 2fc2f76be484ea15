//! Browser engine abstraction and scoped resource handling
//!
//! The exporter only needs a handful of primitives from the browser: launch,
//! open an isolated session, navigate, evaluate a script, size the viewport,
//! wait for network idle, print, and close. They are expressed as traits so
//! the orchestration logic can run against Chromium in production and
//! against scripted fakes in tests.
//!
//! [`with_engine`] and [`with_session`] acquire a resource, run a workflow
//! against it and release it exactly once, whatever the workflow's outcome.
//! Releases run on their own task. If the surrounding future is dropped
//! before or during the release, the release still completes in the
//! background.

use crate::payload::CookieSpec;
use crate::{Dimensions, ExportError, Tracer};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;

/// One isolated browsing context (own cookies and storage) with one page.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Session: Send + Sync {
    /// Navigate the page and wait for it to load.
    async fn goto(&self, url: &str) -> Result<(), ExportError>;

    async fn reload(&self) -> Result<(), ExportError>;

    /// Evaluate a script expression in the page.
    ///
    /// `Ok(None)` means the expression produced `undefined`. A page without
    /// a script context yet yields [`ExportError::TransientContext`].
    async fn evaluate(&self, expression: &str) -> Result<Option<serde_json::Value>, ExportError>;

    /// Delete every cookie visible to the current page.
    async fn clear_cookies(&self) -> Result<(), ExportError>;

    /// Set cookies; those without a domain are bound to `url`.
    async fn set_cookies(&self, url: &str, cookies: &[CookieSpec]) -> Result<(), ExportError>;

    async fn set_viewport(&self, dimensions: Dimensions) -> Result<(), ExportError>;

    /// Resolves once the engine sees no network activity for its quiet window.
    async fn wait_for_network_idle(&self) -> Result<(), ExportError>;

    /// Print the first page as a PDF of the given paper size.
    async fn print_to_pdf(&self, dimensions: Dimensions) -> Result<Vec<u8>, ExportError>;

    async fn close(&self) -> Result<(), ExportError>;
}

/// A running browser process.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn open_session(&self) -> Result<Arc<dyn Session>, ExportError>;

    /// Terminate the process. Using the engine afterwards is an error.
    async fn close(&self) -> Result<(), ExportError>;
}

#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn Engine>, ExportError>;
}

/// Closes a session exactly once.
pub struct SessionGuard {
    session: Option<Arc<dyn Session>>,
    tracer: Tracer,
}

impl SessionGuard {
    pub fn new(session: Arc<dyn Session>, tracer: Tracer) -> Self {
        Self {
            session: Some(session),
            tracer,
        }
    }

    /// Close the session, logging a failure rather than returning it.
    ///
    /// The close runs on its own task: dropping this future while it waits
    /// still lets the release finish.
    pub async fn close(mut self) {
        if let Some(task) = self.release() {
            if let Err(e) = task.await {
                warn!(export_id = self.tracer.export_id(), "Session release task failed: {}", e);
            }
        }
    }

    fn release(&mut self) -> Option<JoinHandle<()>> {
        let session = self.session.take()?;
        spawn_release(self.tracer.clone(), "session", async move { session.close().await })
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Closes an engine exactly once.
pub struct EngineGuard {
    engine: Option<Arc<dyn Engine>>,
    tracer: Tracer,
}

impl EngineGuard {
    pub fn new(engine: Arc<dyn Engine>, tracer: Tracer) -> Self {
        Self {
            engine: Some(engine),
            tracer,
        }
    }

    pub fn engine(&self) -> Option<&Arc<dyn Engine>> {
        self.engine.as_ref()
    }

    pub async fn close(mut self) {
        if let Some(task) = self.release() {
            if let Err(e) = task.await {
                warn!(export_id = self.tracer.export_id(), "Browser release task failed: {}", e);
            }
        }
    }

    fn release(&mut self) -> Option<JoinHandle<()>> {
        let engine = self.engine.take()?;
        spawn_release(self.tracer.clone(), "browser", async move { engine.close().await })
    }
}

impl Drop for EngineGuard {
    fn drop(&mut self) {
        self.release();
    }
}

fn spawn_release<F>(tracer: Tracer, what: &'static str, release: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = Result<(), ExportError>> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Some(handle.spawn(async move {
            let step = format!("closing {what}");
            if let Err(e) = tracer.step(&step, release).await {
                warn!(export_id = tracer.export_id(), "Failed to close {}: {}", what, e);
            }
        })),
        Err(_) => {
            warn!(export_id = tracer.export_id(), "No runtime left to release {}", what);
            None
        }
    }
}

/// Launch an engine, run `workflow` with it, then close it.
///
/// The engine is closed after the workflow settles, on success and failure
/// alike, and the workflow's outcome is returned unchanged.
pub async fn with_engine<T, F, Fut>(
    launcher: &dyn EngineLauncher,
    tracer: &Tracer,
    workflow: F,
) -> Result<T, ExportError>
where
    F: FnOnce(Arc<dyn Engine>) -> Fut,
    Fut: Future<Output = Result<T, ExportError>>,
{
    let tracer = tracer.scoped("engine");
    let engine = tracer.step("launching browser", launcher.launch()).await?;
    crate::metrics::ExportMetrics::record_engine_launch();

    let guard = EngineGuard::new(engine.clone(), tracer.clone());
    let outcome = tracer
        .step("executing action", Box::pin(workflow(engine)))
        .await;
    guard.close().await;

    outcome
}

/// Open an isolated session on `engine`, run `workflow` with it, then close it.
///
/// The session is closed before the workflow's outcome is returned. A failure
/// to close is logged and does not replace that outcome.
pub async fn with_session<T, F, Fut>(
    engine: &dyn Engine,
    tracer: &Tracer,
    workflow: F,
) -> Result<T, ExportError>
where
    F: FnOnce(Arc<dyn Session>) -> Fut,
    Fut: Future<Output = Result<T, ExportError>>,
{
    let tracer = tracer.scoped("session");
    let session = tracer
        .step("opening isolated session", engine.open_session())
        .await?;

    let guard = SessionGuard::new(session.clone(), tracer.clone());
    let outcome = tracer
        .step("executing workflow", Box::pin(workflow(session)))
        .await;
    guard.close().await;

    outcome
}
