//! # Browser Export
//!
//! Export rendered web pages to PDF by driving headless Chromium, with every
//! wait of an export bounded by a single deadline.
//!
//! An export validates its payload, resolves the paper size to pixels,
//! launches (or reuses) a browser, opens an isolated session, injects
//! credentials, navigates, waits until the page reports it is ready and
//! prints the first page. Sessions and browsers are always released, whether
//! the export succeeds, fails or runs out of time.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let payload = json!({
//!         "url": "https://example.com",
//!         "paper": {"format": "a4", "landscape": true},
//!         "waitUntil": {"networkIdle": true}
//!     });
//!     let pdf = browser_export::export_document(&payload, 30.0, None).await?;
//!     println!("PDF exported: {} bytes", pdf.len());
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! browser-export export --url https://example.com --output page.pdf --format a4
//! browser-export serve --port 5000 --authorized-url-pattern '^https://example\.com'
//! browser-export invoke --event event.json
//! ```
//!
//! Pages opt into a later snapshot by setting `window.renderComplete = false`
//! and flipping it to `true` once they are done rendering.

/// Configuration and settings for the exporter
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Per-export step tracing
pub mod trace;

/// Paper formats and pixel dimensions
pub mod paper;

/// Export deadline and bounded waits
pub mod deadline;

/// Browser engine and session abstractions with scoped release
pub mod engine;

/// Chromium engine adapter
pub mod chrome;

/// Waiting for a usable script context
pub mod context;

/// Cookie and web storage injection
pub mod auth;

/// Page readiness gates
pub mod readiness;

/// Export payload model and validation
pub mod payload;

/// Export orchestration
pub mod exporter;

/// Authorized-URL policy
pub mod policy;

/// HTTP server
pub mod server;

/// Function-as-a-service adapter
pub mod function;

/// Command-line interface implementation
pub mod cli;

/// Performance metrics collection
pub mod metrics;

/// Utility functions and helpers
pub mod utils;


pub use cli::*;
pub use config::*;
pub use deadline::Deadline;
pub use engine::{Engine, EngineLauncher, Session};
pub use error::*;
pub use exporter::*;
pub use function::{handle_event, FunctionResponse};
pub use metrics::*;
pub use paper::*;
pub use payload::*;
pub use policy::*;
pub use server::{build_router, serve, ServerState};
pub use trace::*;
pub use utils::*;
