use browser_export::{setup_logging, validate_config, Cli, CliRunner, Config};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse CLI arguments
    let args = Cli::parse();

    setup_logging(args.verbose)?;

    info!("Starting browser-export v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args).await?;

    // Setup graceful shutdown
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
    let _shutdown_handler = setup_shutdown_handler(shutdown_tx.clone());

    let cli_runner = CliRunner::new(config, shutdown_tx);

    // The server drains its own connections on shutdown; everything else is
    // simply abandoned.
    let result = if args.command.runs_until_shutdown() {
        cli_runner.run(args.command).await
    } else {
        tokio::select! {
            result = cli_runner.run(args.command) => result,
            _ = shutdown_rx.recv() => {
                info!("Received shutdown signal");
                Ok(())
            }
        }
    };

    if let Err(e) = result {
        error!("Application error: {}", e);
        std::process::exit(1);
    }

    info!("browser-export stopped");
    Ok(())
}

async fn load_config(args: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path).await?,
        None => Config::default(),
    };

    // Override with CLI arguments
    if let Some(timeout) = args.timeout {
        config.export.timeout_in_seconds = timeout;
    }

    if let Some(chrome_path) = &args.chrome_path {
        config.engine.chrome_path = Some(chrome_path.clone());
    }

    validate_config(&config)?;

    info!("Configuration loaded successfully");
    info!("Export timeout: {}s", config.export.timeout_in_seconds);
    info!("Launch mode: {:?}", config.engine.launch_mode);

    Ok(config)
}

fn setup_shutdown_handler(shutdown_tx: broadcast::Sender<()>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => {
                let _ = shutdown_tx.send(());
            }
            Err(e) => error!("Failed to install signal handlers: {}", e),
        }
    })
}

async fn wait_for_signal() -> std::io::Result<()> {
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
    }

    Ok(())
}
