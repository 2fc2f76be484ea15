//! Configuration management with serde serialization/deserialization
//!
//! This module holds the configuration of the exporter: how Chromium is
//! launched, the export budget and URL policy, and where the HTTP server
//! listens. Every section has defaults so a configuration file only needs
//! to name what it changes.

use crate::deadline::Deadline;
use crate::ExportError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
///
/// # Examples
///
/// ```rust
/// use browser_export::{Config, LaunchMode};
///
/// let config = Config::default();
/// assert_eq!(config.export.timeout_in_seconds, 30.0);
///
/// let mut shared = Config::default();
/// shared.engine.launch_mode = LaunchMode::Shared;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// How the browser engine is launched
    pub engine: EngineOptions,

    /// Per-export limits and policy
    pub export: ExportSettings,

    /// HTTP server settings
    pub server: ServerSettings,
}

/// Whether each export gets its own browser process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// Launch a browser for every export and close it afterwards
    PerExport,
    /// Launch once and open one isolated session per export
    Shared,
}

/// Browser launch options
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Run without a visible window (default: true)
    pub headless: bool,

    /// Keep Chromium's sandbox enabled (default: false)
    ///
    /// Containers usually lack the privileges the sandbox needs.
    pub sandbox: bool,

    /// Initial window width in pixels (default: 1920)
    pub window_width: u32,

    /// Initial window height in pixels (default: 1080)
    pub window_height: u32,

    /// Timeout of a single DevTools request in seconds (default: 60)
    pub request_timeout_secs: u64,

    /// Additional command-line arguments passed to Chromium
    pub extra_args: Vec<String>,

    /// Per-export or shared browser (default: per export)
    pub launch_mode: LaunchMode,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            sandbox: false,
            window_width: 1920,
            window_height: 1080,
            request_timeout_secs: 60,
            extra_args: Vec::new(),
            launch_mode: LaunchMode::PerExport,
        }
    }
}

impl EngineOptions {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Maximum amount of seconds an export may take (default: 30)
    pub timeout_in_seconds: f64,

    /// Regular expression the exported URL has to match (default: any URL)
    pub authorized_url_pattern: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            timeout_in_seconds: 30.0,
            authorized_url_pattern: ".".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind (default: 0.0.0.0)
    pub bind: String,

    /// Port to listen on (default: 5000)
    pub port: u16,

    /// Serve Prometheus metrics on `/metrics` (default: false)
    pub metrics: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 5000,
            metrics: false,
        }
    }
}

impl Config {
    /// Load a configuration file; missing fields keep their defaults.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ExportError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }
}

/// Reject configurations that could only fail later, at export time.
pub fn validate_config(config: &Config) -> Result<(), ExportError> {
    Deadline::budget_from_seconds(config.export.timeout_in_seconds)?;

    regex::Regex::new(&config.export.authorized_url_pattern).map_err(|e| {
        ExportError::Configuration(format!("Invalid authorized URL pattern: {e}"))
    })?;

    if config.engine.window_width == 0 || config.engine.window_height == 0 {
        return Err(ExportError::Configuration(
            "Window dimensions must be greater than 0".to_string(),
        ));
    }

    if config.engine.request_timeout_secs == 0 {
        return Err(ExportError::Configuration(
            "Request timeout must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

/// Generate Chrome command-line arguments based on engine options
///
/// # Examples
///
/// ```rust
/// use browser_export::{get_chrome_args, EngineOptions};
///
/// let args = get_chrome_args(&EngineOptions::default());
/// assert!(args.contains(&"--no-sandbox".to_string()));
/// ```
pub fn get_chrome_args(options: &EngineOptions) -> Vec<String> {
    let mut args = vec![
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--hide-scrollbars".to_string(),
        "--mute-audio".to_string(),
        format!(
            "--user-data-dir={}",
            std::env::temp_dir()
                .join(format!("browser-export-{}-{}", std::process::id(), uuid::Uuid::new_v4()))
                .display()
        ),
    ];

    if !options.sandbox {
        args.push("--no-sandbox".to_string());
        args.push("--disable-setuid-sandbox".to_string());
    }

    args.extend(options.extra_args.iter().cloned());
    args
}

/// Build the chromiumoxide launch configuration
pub fn create_browser_config(
    options: &EngineOptions,
) -> Result<chromiumoxide::browser::BrowserConfig, ExportError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(options.window_width, options.window_height)
        .request_timeout(options.request_timeout())
        .args(get_chrome_args(options));

    if !options.headless {
        builder = builder.with_head();
    }

    if let Some(chrome_path) = &options.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder
        .build()
        .map_err(|e| ExportError::EngineLaunch(format!("Failed to build browser config: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"export": {"timeout_in_seconds": 7}, "engine": {"launch_mode": "shared"}}"#,
        )
        .unwrap();

        assert_eq!(config.export.timeout_in_seconds, 7.0);
        assert_eq!(config.export.authorized_url_pattern, ".");
        assert_eq!(config.engine.launch_mode, LaunchMode::Shared);
        assert!(config.engine.headless);
        assert_eq!(config.server.port, 5000);
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        let mut config = Config::default();
        config.export.timeout_in_seconds = 0.0;
        assert!(matches!(validate_config(&config), Err(ExportError::InvalidTimeout(_))));

        let mut config = Config::default();
        config.export.authorized_url_pattern = "(".to_string();
        assert!(matches!(validate_config(&config), Err(ExportError::Configuration(_))));

        let mut config = Config::default();
        config.engine.window_width = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_chrome_args_follow_options() {
        let sandboxed = EngineOptions {
            sandbox: true,
            extra_args: vec!["--lang=fr".to_string()],
            ..Default::default()
        };
        let args = get_chrome_args(&sandboxed);
        assert!(!args.contains(&"--no-sandbox".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--lang=fr"));

        let args = get_chrome_args(&EngineOptions::default());
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.iter().any(|arg| arg.starts_with("--user-data-dir=")));
    }
}
