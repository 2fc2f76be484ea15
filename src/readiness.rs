//! Render readiness gates
//!
//! Before the page is printed three conditions are awaited concurrently: the
//! document (and the application, when it opts in through
//! `window.renderComplete`) is done rendering, the network is idle when that
//! was requested, and the viewport matches the paper. A last gate then waits
//! for the browser's main thread to go idle once.

use crate::deadline::Deadline;
use crate::engine::Session;
use crate::payload::WaitUntil;
use crate::{Dimensions, ExportError, Tracer};
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;

/// Interval between two evaluations of a polled condition.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// `undefined` or `false` keep the gate closed, any other value opens it.
const RENDER_COMPLETE: &str =
    "document.readyState === 'complete' && window.renderComplete !== false";

const BODY_PRESENT: &str = "document.body !== null";

const IDLE_CALLBACK_FLAG: &str = "browserExport_waitedForIdleCallback";

/// JavaScript truthiness of an evaluation result. `None` is `undefined`.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map_or(true, |n| n != 0.0 && !n.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Evaluate `expression` until it is truthy.
///
/// A missing execution context counts as "not yet", since the page may be
/// between two documents while navigating.
pub async fn wait_for_function(
    session: &dyn Session,
    expression: &str,
    description: &str,
    deadline: &Deadline,
) -> Result<(), ExportError> {
    let poll = async {
        loop {
            match session.evaluate(expression).await {
                Ok(value) if is_truthy(value.as_ref()) => return Ok(()),
                Ok(_) => {}
                Err(e) if e.is_transient() => {}
                Err(e) => return Err(e),
            }
            sleep(POLL_INTERVAL).await;
        }
    };

    let message = format!(
        "Failed to wait for {} under the given timeout of {} milliseconds.",
        description,
        deadline.remaining().as_millis()
    );
    deadline.guard(poll, message).await
}

/// Wait until the page is rendered, idle on the network if asked, and sized.
///
/// The gates run concurrently and in no particular order; the first failing
/// gate fails the whole wait.
pub async fn await_ready(
    session: &dyn Session,
    dimensions: Dimensions,
    wait_until: &WaitUntil,
    deadline: &Deadline,
    tracer: &Tracer,
) -> Result<(), ExportError> {
    let tracer = tracer.scoped("readiness");

    let render_gate = tracer.step(
        "wait for complete render",
        wait_for_function(session, RENDER_COMPLETE, "complete render", deadline),
    );

    let network_gate = async {
        if !wait_until.network_idle {
            tracer.note("no need to wait for idle network");
            return Ok(());
        }
        tracer
            .step(
                "wait for idle network",
                deadline.guard(
                    session.wait_for_network_idle(),
                    format!(
                        "Failed to wait for idle network under the given timeout of {} milliseconds.",
                        deadline.remaining().as_millis()
                    ),
                ),
            )
            .await
    };

    let viewport_gate = tracer.step("resize browser page", resize(session, dimensions, deadline));

    futures::try_join!(render_gate, network_gate, viewport_gate)?;
    Ok(())
}

async fn resize(
    session: &dyn Session,
    dimensions: Dimensions,
    deadline: &Deadline,
) -> Result<(), ExportError> {
    session.set_viewport(dimensions).await?;
    // The viewport alone does not always reach the layout; pin the body size too.
    wait_for_function(session, BODY_PRESENT, "document body", deadline).await?;
    session.evaluate(&body_size_script(dimensions)).await?;
    Ok(())
}

pub fn body_size_script(dimensions: Dimensions) -> String {
    format!(
        "(() => {{\n  const bodyStyle = document.getElementsByTagName('body')[0].style;\n  bodyStyle.width = '{}px';\n  bodyStyle.height = '{}px';\n}})()",
        dimensions.width, dimensions.height
    )
}

/// Wait for the browser's next idle period.
///
/// The first evaluation installs a flag and an idle callback that sets it;
/// later evaluations only read the flag.
pub async fn wait_for_idle_browser(
    session: &dyn Session,
    deadline: &Deadline,
    tracer: &Tracer,
) -> Result<(), ExportError> {
    tracer
        .scoped("readiness")
        .step(
            "wait for idle browser",
            wait_for_function(session, &idle_callback_script(), "idle browser", deadline),
        )
        .await
}

fn idle_callback_script() -> String {
    format!(
        "(() => {{\n  if (window.{flag} === undefined) {{\n    window.{flag} = false;\n    window.requestIdleCallback(() => {{\n      window.{flag} = true;\n    }});\n  }}\n  return window.{flag};\n}})()",
        flag = IDLE_CALLBACK_FLAG
    )
}
