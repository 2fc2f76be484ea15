//! Chromium engine backed by chromiumoxide
//!
//! One [`ChromeEngine`] is one Chromium process driven over the DevTools
//! protocol. Each session lives in its own browser context, so cookies and
//! storage never leak between exports sharing a process.

use crate::config::{create_browser_config, EngineOptions};
use crate::engine::{Engine, EngineLauncher, Session};
use crate::payload::CookieSpec;
use crate::{Dimensions, ExportError};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, DeleteCookiesParams, EnableParams, EventLoadingFailed, EventLoadingFinished,
    EventRequestWillBeSent, RequestId, TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// How long the network must stay quiet to count as idle.
pub const NETWORK_QUIET_WINDOW: Duration = Duration::from_millis(500);

/// Launches Chromium processes with fixed options.
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    options: EngineOptions,
}

impl ChromeLauncher {
    pub fn new(options: EngineOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl EngineLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Arc<dyn Engine>, ExportError> {
        let engine = ChromeEngine::launch(&self.options).await?;
        Ok(Arc::new(engine))
    }
}

pub struct ChromeEngine {
    browser: Arc<Mutex<Browser>>,
    handler: std::sync::Mutex<Option<JoinHandle<Result<(), chromiumoxide::error::CdpError>>>>,
    closed: AtomicBool,
}

impl ChromeEngine {
    pub async fn launch(options: &EngineOptions) -> Result<Self, ExportError> {
        let config = create_browser_config(options)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ExportError::EngineLaunch(e.to_string()))?;

        // The handler drives all DevTools traffic and must be polled until the browser exits.
        let handler_task = tokio::spawn(async move {
            loop {
                match handler.next().await {
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!("Handler error: {}", e);
                        return Err(e);
                    }
                    None => {
                        debug!("Handler stream ended");
                        break;
                    }
                }
            }
            Ok(())
        });

        info!("Browser launched");
        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
            handler: std::sync::Mutex::new(Some(handler_task)),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), ExportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExportError::Engine("The browser has already been closed".to_string()));
        }
        Ok(())
    }

    fn take_handler(&self) -> Option<JoinHandle<Result<(), chromiumoxide::error::CdpError>>> {
        match self.handler.lock() {
            Ok(mut handler) => handler.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

#[async_trait]
impl Engine for ChromeEngine {
    async fn open_session(&self) -> Result<Arc<dyn Session>, ExportError> {
        self.ensure_open()?;

        let (context_id, page) = {
            let browser = self.browser.lock().await;
            let context_id = browser
                .create_browser_context(CreateBrowserContextParams::default())
                .await?;

            let target = CreateTargetParams::builder()
                .url("about:blank")
                .browser_context_id(context_id.clone())
                .build()
                .map_err(ExportError::Engine)?;

            match browser.new_page(target).await {
                Ok(page) => (context_id, page),
                Err(e) => {
                    if let Err(dispose) = browser.dispose_browser_context(context_id).await {
                        warn!("Failed to dispose browser context: {}", dispose);
                    }
                    return Err(e.into());
                }
            }
        };

        let network = match NetworkTracker::start(&page).await {
            Ok(network) => network,
            Err(e) => {
                let session = ChromeSession::unattached(page, context_id, self.browser.clone());
                if let Err(close) = session.close().await {
                    warn!("Failed to close session: {}", close);
                }
                return Err(e);
            }
        };

        Ok(Arc::new(ChromeSession {
            page,
            context_id,
            browser: self.browser.clone(),
            network: Some(network),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), ExportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = {
            let mut browser = self.browser.lock().await;
            let closed = browser.close().await;
            if closed.is_ok() {
                if let Err(e) = browser.wait().await {
                    warn!("Failed to wait for browser exit: {}", e);
                }
            }
            closed
        };

        if let Some(handler) = self.take_handler() {
            handler.abort();
        }

        info!("Browser closed");
        result.map(|_| ()).map_err(ExportError::from)
    }
}

impl Drop for ChromeEngine {
    fn drop(&mut self) {
        if let Some(handler) = self.take_handler() {
            handler.abort();
        }
    }
}

/// One browser context with one page.
pub struct ChromeSession {
    page: Page,
    context_id: BrowserContextId,
    browser: Arc<Mutex<Browser>>,
    network: Option<NetworkTracker>,
    closed: AtomicBool,
}

impl ChromeSession {
    fn unattached(page: Page, context_id: BrowserContextId, browser: Arc<Mutex<Browser>>) -> Self {
        Self {
            page,
            context_id,
            browser,
            network: None,
            closed: AtomicBool::new(false),
        }
    }

    fn network(&self) -> Result<&NetworkTracker, ExportError> {
        self.network
            .as_ref()
            .ok_or_else(|| ExportError::Engine("Network tracking is not enabled".to_string()))
    }
}

#[async_trait]
impl Session for ChromeSession {
    async fn goto(&self, url: &str) -> Result<(), ExportError> {
        if let Ok(network) = self.network() {
            network.mark_activity();
        }
        self.page.goto(url).await?;
        Ok(())
    }

    async fn reload(&self) -> Result<(), ExportError> {
        if let Ok(network) = self.network() {
            network.mark_activity();
        }
        self.page.reload().await?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Option<Value>, ExportError> {
        let result = self.page.evaluate(expression).await?;
        Ok(result.value().cloned())
    }

    async fn clear_cookies(&self) -> Result<(), ExportError> {
        let existing = self.page.get_cookies().await?;
        if existing.is_empty() {
            return Ok(());
        }

        let deletions = existing
            .into_iter()
            .map(|cookie| {
                let mut params = DeleteCookiesParams::new(cookie.name);
                params.domain = Some(cookie.domain);
                params.path = Some(cookie.path);
                params
            })
            .collect();
        self.page.delete_cookies(deletions).await?;
        Ok(())
    }

    async fn set_cookies(&self, url: &str, cookies: &[CookieSpec]) -> Result<(), ExportError> {
        let params = cookies
            .iter()
            .map(|cookie| cookie_param(url, cookie))
            .collect();
        self.page.set_cookies(params).await?;
        Ok(())
    }

    async fn set_viewport(&self, dimensions: Dimensions) -> Result<(), ExportError> {
        let params = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(dimensions.width))
            .height(i64::from(dimensions.height))
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(ExportError::Engine)?;
        self.page.execute(params).await?;
        Ok(())
    }

    async fn wait_for_network_idle(&self) -> Result<(), ExportError> {
        self.network()?.wait_for_idle(NETWORK_QUIET_WINDOW).await
    }

    async fn print_to_pdf(&self, dimensions: Dimensions) -> Result<Vec<u8>, ExportError> {
        let params = PrintToPdfParams {
            print_background: Some(true),
            page_ranges: Some("1".to_string()),
            paper_width: Some(dimensions.width_in_inches()),
            paper_height: Some(dimensions.height_in_inches()),
            margin_top: Some(0.0),
            margin_bottom: Some(0.0),
            margin_left: Some(0.0),
            margin_right: Some(0.0),
            ..Default::default()
        };
        let pdf = self.page.pdf(params).await?;
        Ok(pdf)
    }

    async fn close(&self) -> Result<(), ExportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(network) = &self.network {
            network.stop();
        }

        let closed_page = self.page.clone().close().await;
        let disposed = self
            .browser
            .lock()
            .await
            .dispose_browser_context(self.context_id.clone())
            .await;

        closed_page?;
        disposed?;
        Ok(())
    }
}

fn cookie_param(url: &str, cookie: &CookieSpec) -> CookieParam {
    let mut param = CookieParam::new(cookie.name.clone(), cookie.value.clone());
    match &cookie.domain {
        Some(domain) => param.domain = Some(domain.clone()),
        None => param.url = Some(url.to_string()),
    }
    param.path = cookie.path.clone();
    param.secure = Some(cookie.secure);
    param.http_only = Some(cookie.http_only);
    param.expires = cookie.expires.map(|seconds| TimeSinceEpoch::new(seconds as f64));
    param
}

#[derive(Debug, Clone, Copy)]
struct NetworkActivity {
    in_flight: usize,
    last_change: Instant,
}

/// Counts in-flight requests of one page from DevTools network events.
struct NetworkTracker {
    state: Arc<watch::Sender<NetworkActivity>>,
    task: JoinHandle<()>,
}

impl NetworkTracker {
    async fn start(page: &Page) -> Result<Self, ExportError> {
        let mut started = page.event_listener::<EventRequestWillBeSent>().await?;
        let mut finished = page.event_listener::<EventLoadingFinished>().await?;
        let mut failed = page.event_listener::<EventLoadingFailed>().await?;
        page.execute(EnableParams::default()).await?;

        let (sender, _) = watch::channel(NetworkActivity {
            in_flight: 0,
            last_change: Instant::now(),
        });
        let state = Arc::new(sender);
        let updates = state.clone();

        let task = tokio::spawn(async move {
            let mut pending: HashSet<RequestId> = HashSet::new();
            loop {
                let changed = tokio::select! {
                    Some(event) = started.next() => pending.insert(event.request_id.clone()),
                    Some(event) = finished.next() => pending.remove(&event.request_id),
                    Some(event) = failed.next() => pending.remove(&event.request_id),
                    else => break,
                };
                if changed {
                    let in_flight = pending.len();
                    updates.send_replace(NetworkActivity {
                        in_flight,
                        last_change: Instant::now(),
                    });
                }
            }
        });

        Ok(Self { state, task })
    }

    /// Restart the quiet window, e.g. when a navigation is about to begin.
    fn mark_activity(&self) {
        self.state.send_modify(|activity| activity.last_change = Instant::now());
    }

    async fn wait_for_idle(&self, quiet_window: Duration) -> Result<(), ExportError> {
        let mut updates = self.state.subscribe();
        loop {
            let activity = *updates.borrow_and_update();
            if activity.in_flight == 0 {
                let quiet_for = activity.last_change.elapsed();
                if quiet_for >= quiet_window {
                    return Ok(());
                }
                tokio::select! {
                    _ = sleep(quiet_window - quiet_for) => {}
                    changed = updates.changed() => changed.map_err(|_| network_closed())?,
                }
            } else {
                updates.changed().await.map_err(|_| network_closed())?;
            }
        }
    }

    fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for NetworkTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn network_closed() -> ExportError {
    ExportError::Engine("Network event stream closed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_without_domain_is_bound_to_url() {
        let cookie = CookieSpec::new("name", "value");
        let param = cookie_param("https://example.com/app", &cookie);

        assert_eq!(param.url.as_deref(), Some("https://example.com/app"));
        assert_eq!(param.domain, None);
        assert_eq!(param.secure, Some(false));
        assert_eq!(param.http_only, Some(false));
    }

    #[test]
    fn test_cookie_with_domain_keeps_attributes() {
        let cookie = CookieSpec {
            domain: Some("example.com".to_string()),
            path: Some("/".to_string()),
            expires: Some(1509574531),
            secure: true,
            ..CookieSpec::new("JSESSIONID", "8835D6F1")
        };
        let param = cookie_param("https://example.com", &cookie);

        assert_eq!(param.url, None);
        assert_eq!(param.domain.as_deref(), Some("example.com"));
        assert_eq!(param.path.as_deref(), Some("/"));
        assert_eq!(param.secure, Some(true));
        assert!(param.expires.is_some());
    }

    #[tokio::test]
    async fn test_network_idle_waits_for_quiet_window() {
        let (sender, _) = watch::channel(NetworkActivity {
            in_flight: 1,
            last_change: Instant::now(),
        });
        let tracker = NetworkTracker {
            state: Arc::new(sender),
            task: tokio::spawn(async {}),
        };

        let state = tracker.state.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            state.send_replace(NetworkActivity {
                in_flight: 0,
                last_change: Instant::now(),
            });
        });

        let started = Instant::now();
        tracker
            .wait_for_idle(Duration::from_millis(100))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(150));
    }
}
