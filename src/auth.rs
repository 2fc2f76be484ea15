//! Credential injection
//!
//! Cookies and web storage can only be written for an origin the page is on,
//! so the page first navigates to the export URL. Once both are injected the
//! page is reloaded: applications commonly read their credentials once, at
//! startup, and would never see values written after it.

use crate::context::wait_for_context;
use crate::deadline::Deadline;
use crate::engine::Session;
use crate::payload::{AuthSpec, CookieSpec, WebStorageItemSpec};
use crate::{ExportError, Tracer};

/// Inject `auth` into `session` for `url`, then reload the page.
///
/// Does nothing at all, not even navigate, when there is nothing to inject.
pub async fn authenticate(
    session: &dyn Session,
    auth: &AuthSpec,
    url: &str,
    deadline: &Deadline,
    tracer: &Tracer,
) -> Result<(), ExportError> {
    let tracer = tracer.scoped("authenticate");
    if auth.is_empty() {
        tracer.note("no authentication needed");
        return Ok(());
    }

    tracer.step("navigation", session.goto(url)).await?;
    wait_for_context(session, deadline, &tracer).await?;

    futures::try_join!(
        inject_cookies(session, &auth.cookies, url, &tracer),
        inject_web_storage_items(session, &auth.web_storage_items, &tracer),
    )?;

    tracer.step("reload", session.reload()).await
}

async fn inject_cookies(
    session: &dyn Session,
    cookies: &[CookieSpec],
    url: &str,
    tracer: &Tracer,
) -> Result<(), ExportError> {
    if cookies.is_empty() {
        tracer.note("no cookies to inject");
        return Ok(());
    }

    tracer
        .step("cookies injection", async {
            session.clear_cookies().await?;
            session.set_cookies(url, cookies).await
        })
        .await
}

async fn inject_web_storage_items(
    session: &dyn Session,
    items: &[WebStorageItemSpec],
    tracer: &Tracer,
) -> Result<(), ExportError> {
    if items.is_empty() {
        tracer.note("no Web Storage items to inject");
        return Ok(());
    }

    tracer
        .step("Web Storage items injection", async {
            for item in items {
                session.evaluate(&web_storage_script(item)?).await?;
            }
            Ok(())
        })
        .await
}

/// Script writing one item into the storage named by its type.
///
/// Key and value are embedded as JSON string literals, which are valid
/// script string literals whatever characters they contain.
pub fn web_storage_script(item: &WebStorageItemSpec) -> Result<String, ExportError> {
    Ok(format!(
        "window.{}.setItem({}, {})",
        item.storage_type.storage_object(),
        serde_json::to_string(&item.key)?,
        serde_json::to_string(&item.value)?
    ))
}
