use crate::chrome::ChromeLauncher;
use crate::exporter::{DocumentExporter, Exporter};
use crate::function::{handle_event, timeout_from_remaining, FUNCTION_CHROME_ARGS};
use crate::metrics::install_prometheus_recorder;
use crate::payload::{ExportPayload, PayloadValidator, SchemaValidator};
use crate::policy::UrlPolicy;
use crate::server::{serve, ServerState};
use crate::utils::{format_bytes, format_duration};
use crate::{resolve_dimensions, Config, ExportError, LaunchMode, PaperFormat, PaperSpec};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "browser-export")]
#[command(about = "Export web pages to PDF with headless Chromium")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "PDF_EXPORT_TIMEOUT_IN_SECONDS", help = "Export timeout in seconds")]
    pub timeout: Option<f64>,

    #[arg(long, env = "CHROMIUM_EXECUTABLE_PATH", help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Export a single page to a PDF file
    Export {
        #[arg(short, long, required_unless_present = "payload", help = "URL to export")]
        url: Option<String>,

        #[arg(long, conflicts_with = "url", help = "JSON payload file")]
        payload: Option<PathBuf>,

        #[arg(short, long, help = "Output file path")]
        output: PathBuf,

        #[arg(long, help = "Paper format (letter, legal, tabloid, ledger, a0 to a6)")]
        format: Option<String>,

        #[arg(long, requires = "format", help = "Landscape orientation for the paper format")]
        landscape: bool,

        #[arg(long, requires = "height", help = "Paper width, e.g. 21cm")]
        width: Option<String>,

        #[arg(long, requires = "width", help = "Paper height, e.g. 29.7cm")]
        height: Option<String>,

        #[arg(long, help = "Wait for the network to be idle")]
        network_idle: bool,
    },

    /// Start the HTTP server
    Serve {
        #[arg(short, long, env = "PORT", help = "Server port")]
        port: Option<u16>,

        #[arg(long, help = "Bind address")]
        bind: Option<String>,

        #[arg(long, env = "PDF_EXPORT_AUTHORIZED_URL_PATTERN", help = "Regular expression URLs must match")]
        authorized_url_pattern: Option<String>,

        #[arg(long, help = "Enable metrics endpoint")]
        metrics: bool,
    },

    /// Handle one function invocation event and print the response
    Invoke {
        #[arg(short, long, help = "Event JSON file")]
        event: PathBuf,

        #[arg(long, env = "PDF_EXPORT_AUTHORIZED_URL_PATTERN", help = "Regular expression URLs must match")]
        authorized_url_pattern: Option<String>,

        #[arg(long, help = "Remaining invocation time in milliseconds")]
        remaining_ms: Option<u64>,
    },

    /// Validate a payload and show the resolved page size
    Validate {
        #[arg(short, long, help = "JSON payload file")]
        payload: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

impl Commands {
    /// Commands that stop on their own when a shutdown signal arrives.
    pub fn runs_until_shutdown(&self) -> bool {
        matches!(self, Commands::Serve { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub url: Option<String>,
    pub payload: Option<PathBuf>,
    pub output: PathBuf,
    pub format: Option<String>,
    pub landscape: bool,
    pub width: Option<String>,
    pub height: Option<String>,
    pub network_idle: bool,
}

#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub authorized_url_pattern: Option<String>,
    pub metrics: bool,
}

pub struct CliRunner {
    pub config: Config,
    shutdown: broadcast::Sender<()>,
}

impl CliRunner {
    pub fn new(config: Config, shutdown: broadcast::Sender<()>) -> Self {
        Self { config, shutdown }
    }

    pub async fn run(&self, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
        match command {
            Commands::Export {
                url,
                payload,
                output,
                format,
                landscape,
                width,
                height,
                network_idle,
            } => {
                self.run_export(ExportOptions {
                    url,
                    payload,
                    output,
                    format,
                    landscape,
                    width,
                    height,
                    network_idle,
                })
                .await
            }
            Commands::Serve {
                port,
                bind,
                authorized_url_pattern,
                metrics,
            } => {
                self.run_server(ServeOptions {
                    port,
                    bind,
                    authorized_url_pattern,
                    metrics,
                })
                .await
            }
            Commands::Invoke {
                event,
                authorized_url_pattern,
                remaining_ms,
            } => {
                self.run_invoke(event, authorized_url_pattern, remaining_ms)
                    .await
            }
            Commands::Validate { payload } => self.validate_payload(payload).await,
            Commands::Config => self.show_config(),
        }
    }

    pub async fn run_export(&self, options: ExportOptions) -> Result<(), Box<dyn std::error::Error>> {
        let exporter = Exporter::from_options(&self.config.engine);
        let timeout = self.config.export.timeout_in_seconds;
        let started_at = Instant::now();

        let result = match (&options.payload, &options.url) {
            (Some(path), _) => {
                info!("Exporting payload from {}", path.display());
                let payload = read_json(path).await?;
                exporter.export(&payload, timeout).await
            }
            (None, Some(url)) => {
                info!("Exporting {}", url);
                let paper = paper_from_flags(
                    options.format.as_deref(),
                    options.landscape,
                    options.width.clone(),
                    options.height.clone(),
                )?;
                let mut payload = ExportPayload::new(url.clone()).with_network_idle(options.network_idle);
                if let Some(paper) = paper {
                    payload = payload.with_paper(paper);
                }
                exporter.export_payload(&payload, timeout).await
            }
            (None, None) => return Err("Either --url or --payload is required".into()),
        };
        exporter.shutdown().await;

        let pdf = result?;
        if let Some(parent) = options.output.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&options.output, &pdf).await?;

        println!("PDF exported successfully:");
        println!("  Output: {}", options.output.display());
        println!("  Size: {}", format_bytes(pdf.len()));
        println!("  Duration: {}", format_duration(started_at.elapsed()));

        Ok(())
    }

    pub async fn run_server(&self, options: ServeOptions) -> Result<(), Box<dyn std::error::Error>> {
        let mut settings = self.config.server.clone();
        if let Some(port) = options.port {
            settings.port = port;
        }
        if let Some(bind) = options.bind {
            settings.bind = bind;
        }

        let pattern = options
            .authorized_url_pattern
            .unwrap_or_else(|| self.config.export.authorized_url_pattern.clone());
        let policy = UrlPolicy::new(&pattern)?;
        info!("Authorized URL pattern: {}", policy.pattern().unwrap_or("<any>"));

        let exporter = Arc::new(Exporter::new(
            Arc::new(ChromeLauncher::new(self.config.engine.clone())),
            LaunchMode::Shared,
        ));
        exporter.start().await?;

        let mut state = ServerState::new(exporter.clone(), policy, self.config.export.timeout_in_seconds);
        if options.metrics || settings.metrics {
            state = state.with_metrics(install_prometheus_recorder()?);
        }

        let mut shutdown = self.shutdown.subscribe();
        let result = serve(&settings, state, async move {
            let _ = shutdown.recv().await;
        })
        .await;

        exporter.shutdown().await;
        result?;
        Ok(())
    }

    pub async fn run_invoke(
        &self,
        event_path: PathBuf,
        authorized_url_pattern: Option<String>,
        remaining_ms: Option<u64>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let event = read_json(&event_path).await?;

        let pattern = authorized_url_pattern
            .unwrap_or_else(|| self.config.export.authorized_url_pattern.clone());
        let policy = UrlPolicy::new(&pattern)?;

        let mut engine = self.config.engine.clone();
        engine
            .extra_args
            .extend(FUNCTION_CHROME_ARGS.iter().map(|arg| arg.to_string()));
        let exporter = Exporter::new(Arc::new(ChromeLauncher::new(engine)), LaunchMode::PerExport);

        let timeout = remaining_ms
            .map(|ms| timeout_from_remaining(Duration::from_millis(ms)))
            .unwrap_or(self.config.export.timeout_in_seconds);

        let response = handle_event(&event, &policy, &exporter, timeout).await;
        println!("{}", serde_json::to_string_pretty(&response)?);

        Ok(())
    }

    pub async fn validate_payload(&self, path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        println!("Validating payload: {}", path.display());

        let payload = read_json(&path).await?;
        let issues = SchemaValidator.validate(&payload);
        if !issues.is_empty() {
            for issue in &issues {
                error!("{}: {}", issue.path, issue.message);
            }
            println!("{}", serde_json::to_string_pretty(&issues)?);
            return Err(format!("Payload has {} validation issue(s)", issues.len()).into());
        }

        let payload = SchemaValidator.parse(&payload)?;
        let dimensions = resolve_dimensions(payload.paper.as_ref())?;

        println!("Payload is valid:");
        println!("  URL: {}", payload.url);
        println!("  Page: {}x{} px", dimensions.width, dimensions.height);
        println!("  Network idle: {}", payload.wait_until().network_idle);
        if let Some(auth) = &payload.authentication {
            println!("  Cookies: {}", auth.cookies.len());
            println!("  Web storage items: {}", auth.web_storage_items.len());
        }

        Ok(())
    }

    pub fn show_config(&self) -> Result<(), Box<dyn std::error::Error>> {
        println!("{}", serde_json::to_string_pretty(&self.config)?);
        Ok(())
    }
}

/// Paper spec from `export` flags; `None` when neither a format nor a size
/// was given. `landscape` only applies to a format.
pub fn paper_from_flags(
    format: Option<&str>,
    landscape: bool,
    width: Option<String>,
    height: Option<String>,
) -> Result<Option<PaperSpec>, ExportError> {
    let format = format
        .map(|name| {
            PaperFormat::from_name(name)
                .ok_or_else(|| ExportError::Validation(format!("Unknown paper format: {name}")))
        })
        .transpose()?;

    if format.is_none() && width.is_none() && height.is_none() {
        return Ok(None);
    }

    Ok(Some(PaperSpec {
        format,
        landscape,
        width,
        height,
    }))
}

async fn read_json(path: &Path) -> Result<Value, ExportError> {
    let content = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| e.to_string())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_export_command() {
        let cli = Cli::try_parse_from([
            "browser-export",
            "--timeout",
            "12.5",
            "export",
            "--url",
            "https://example.com",
            "--output",
            "out.pdf",
            "--format",
            "a4",
            "--landscape",
        ])
        .unwrap();

        assert_eq!(cli.timeout, Some(12.5));
        match cli.command {
            Commands::Export { url, format, landscape, .. } => {
                assert_eq!(url.as_deref(), Some("https://example.com"));
                assert_eq!(format.as_deref(), Some("a4"));
                assert!(landscape);
            }
            _ => panic!("expected export command"),
        }
    }

    #[test]
    fn test_export_needs_url_or_payload() {
        assert!(Cli::try_parse_from(["browser-export", "export", "--output", "out.pdf"]).is_err());
        assert!(Cli::try_parse_from([
            "browser-export",
            "export",
            "--url",
            "https://example.com",
            "--payload",
            "payload.json",
            "--output",
            "out.pdf",
        ])
        .is_err());
    }

    #[test]
    fn test_width_requires_height() {
        assert!(Cli::try_parse_from([
            "browser-export",
            "export",
            "--url",
            "https://example.com",
            "--output",
            "out.pdf",
            "--width",
            "21cm",
        ])
        .is_err());
    }

    #[test]
    fn test_landscape_requires_format() {
        assert!(Cli::try_parse_from([
            "browser-export",
            "export",
            "--url",
            "https://example.com",
            "--output",
            "out.pdf",
            "--landscape",
        ])
        .is_err());
    }

    #[test]
    fn test_only_serve_waits_for_shutdown() {
        let serve = Cli::try_parse_from(["browser-export", "serve", "--port", "8080"]).unwrap();
        assert!(serve.command.runs_until_shutdown());

        let config = Cli::try_parse_from(["browser-export", "config"]).unwrap();
        assert!(!config.command.runs_until_shutdown());
    }

    #[test]
    fn test_paper_from_flags() {
        assert_eq!(paper_from_flags(None, false, None, None).unwrap(), None);
        assert_eq!(paper_from_flags(None, true, None, None).unwrap(), None);
        assert_eq!(
            paper_from_flags(Some("A4"), true, None, None).unwrap(),
            Some(PaperSpec::landscape(PaperFormat::A4))
        );
        assert_eq!(
            paper_from_flags(None, false, Some("21cm".to_string()), Some("1in".to_string())).unwrap(),
            Some(PaperSpec::size("21cm", "1in"))
        );
        assert!(matches!(
            paper_from_flags(Some("a7"), false, None, None),
            Err(ExportError::Validation(_))
        ));
    }
}
