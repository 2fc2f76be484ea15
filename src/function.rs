//! Serverless function front end
//!
//! Accepts an API-gateway style event and answers with a response object
//! instead of raising: failures come back as status `500` with the error
//! message as body.

use crate::exporter::DocumentExporter;
use crate::policy::UrlPolicy;
use crate::ExportError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{error, info};

/// Launch flags needed inside a function sandbox.
pub const FUNCTION_CHROME_ARGS: &[&str] = &["--no-sandbox", "--single-process"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionEvent {
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    pub status_code: u16,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_base64_encoded: bool,
}

impl FunctionResponse {
    fn pdf(pdf: &[u8]) -> Self {
        let headers = BTreeMap::from([
            ("Content-disposition".to_string(), "attachment".to_string()),
            ("Content-type".to_string(), "application/pdf".to_string()),
        ]);
        Self {
            status_code: 200,
            body: STANDARD.encode(pdf),
            headers: Some(headers),
            is_base64_encoded: true,
        }
    }

    fn failure(error: &ExportError) -> Self {
        Self {
            status_code: 500,
            body: error.to_string(),
            headers: None,
            is_base64_encoded: false,
        }
    }
}

/// Whole seconds left before the platform kills the invocation, rounded up.
pub fn timeout_from_remaining(remaining: Duration) -> f64 {
    (remaining.as_millis() as f64 / 1000.0).ceil()
}

/// Decode the JSON payload carried by `event`.
///
/// An event without a string `body` is taken to be the payload itself.
pub fn decode_event_body(event: &Value) -> Result<Value, ExportError> {
    if !event.get("body").is_some_and(Value::is_string) {
        return Ok(event.clone());
    }

    let event: FunctionEvent = serde_json::from_value(event.clone())?;
    let body = event.body.unwrap_or_default();

    let text = if event.is_base64_encoded {
        let bytes = STANDARD
            .decode(body.as_bytes())
            .map_err(|e| ExportError::Serialization(format!("Invalid base64 body: {e}")))?;
        String::from_utf8(bytes)
            .map_err(|e| ExportError::Serialization(format!("Body is not UTF-8: {e}")))?
    } else {
        body
    };

    Ok(serde_json::from_str(&text)?)
}

/// Handle one invocation. Never fails; errors become a `500` response.
pub async fn handle_event(
    event: &Value,
    policy: &UrlPolicy,
    exporter: &dyn DocumentExporter,
    timeout_in_seconds: f64,
) -> FunctionResponse {
    let outcome = async {
        let payload = decode_event_body(event)?;
        info!(url = payload.get("url").and_then(serde_json::Value::as_str), "Function invoked");
        policy.authorize(&payload)?;
        exporter.export(&payload, timeout_in_seconds).await
    }
    .await;

    match outcome {
        Ok(pdf) => FunctionResponse::pdf(&pdf),
        Err(e) => {
            error!(kind = e.kind(), "Function invocation failed: {}", e);
            FunctionResponse::failure(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::MockDocumentExporter;
    use serde_json::json;

    #[test]
    fn test_timeout_from_remaining_rounds_up() {
        assert_eq!(timeout_from_remaining(Duration::from_millis(29_001)), 30.0);
        assert_eq!(timeout_from_remaining(Duration::from_millis(30_000)), 30.0);
        assert_eq!(timeout_from_remaining(Duration::from_millis(1)), 1.0);
    }

    #[test]
    fn test_decode_base64_body() {
        let body = STANDARD.encode(r#"{"url": "https://example.com"}"#);
        let event = json!({"body": body, "isBase64Encoded": true});

        let payload = decode_event_body(&event).unwrap();
        assert_eq!(payload["url"], "https://example.com");
    }

    #[test]
    fn test_decode_plain_body() {
        let event = json!({"body": r#"{"url": "https://example.com"}"#});
        assert_eq!(decode_event_body(&event).unwrap()["url"], "https://example.com");
    }

    #[test]
    fn test_direct_payload_event() {
        let event = json!({"url": "https://example.com", "paper": {"format": "a4"}});
        assert_eq!(decode_event_body(&event).unwrap(), event);
    }

    #[test]
    fn test_bad_base64_is_serialization_error() {
        let event = json!({"body": "***", "isBase64Encoded": true});
        assert!(matches!(
            decode_event_body(&event),
            Err(ExportError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_success_is_base64_pdf() {
        let mut exporter = MockDocumentExporter::new();
        exporter
            .expect_export()
            .withf(|_, timeout| *timeout == 12.0)
            .returning(|_, _| Ok(b"%PDF".to_vec()));

        let event = json!({"body": r#"{"url": "https://example.com"}"#});
        let response = handle_event(&event, &UrlPolicy::allow_all(), &exporter, 12.0).await;

        assert_eq!(response.status_code, 200);
        assert!(response.is_base64_encoded);
        assert_eq!(STANDARD.decode(&response.body).unwrap(), b"%PDF");
        let headers = response.headers.unwrap();
        assert_eq!(headers["Content-type"], "application/pdf");
        assert_eq!(headers["Content-disposition"], "attachment");
    }

    #[tokio::test]
    async fn test_unauthorized_is_500_with_message() {
        let mut exporter = MockDocumentExporter::new();
        exporter.expect_export().never();

        let event = json!({"body": r#"{"url": "https://bad.domain.com"}"#});
        let policy = UrlPolicy::new("example").unwrap();
        let response = handle_event(&event, &policy, &exporter, 5.0).await;

        assert_eq!(response.status_code, 500);
        assert_eq!(response.body, "The URL https://bad.domain.com is not authorized.");
        assert!(response.headers.is_none());

        let serialized = serde_json::to_value(&response).unwrap();
        assert_eq!(serialized, json!({"statusCode": 500, "body": response.body}));
    }

    #[tokio::test]
    async fn test_export_failure_is_500() {
        let mut exporter = MockDocumentExporter::new();
        exporter
            .expect_export()
            .returning(|_, _| Err(ExportError::timeout("Failed to perform the export under the given timeout of 5 seconds.")));

        let event = json!({"body": r#"{"url": "https://example.com"}"#});
        let response = handle_event(&event, &UrlPolicy::allow_all(), &exporter, 5.0).await;

        assert_eq!(response.status_code, 500);
        assert!(response.body.contains("timeout"));
    }
}
