//! Tweet relay pipeline - main entry point
//!
//! `tweet-relay run <stage>` starts one relay worker, `tweet-relay crawl`
//! publishes the mock tweets once.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tweet_relay::config::RelayConfig;
use tweet_relay::crawler::{mock_tweets, MockCrawler};
use tweet_relay::observability::{init_default_logging, WorkerMetrics};
use tweet_relay::pipeline::Stage;
use tweet_relay::transport::AmqpTransport;

/// Default configuration files, searched in order
const DEFAULT_CONFIG_PATHS: [&str; 2] = ["relay.toml", "config/relay.toml"];

/// At-least-once relay workers for the mock tweet pipeline
#[derive(Parser)]
#[command(name = "tweet-relay")]
#[command(about = "Queue relay workers for the mock tweet pipeline")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one relay stage until SIGINT/SIGTERM
    Run {
        #[arg(value_enum)]
        stage: Stage,
    },
    /// Publish the mock tweets to tweet_queue and exit
    Crawl,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose);

    info!("Starting tweet-relay v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { stage } => run_stage(stage, config).await,
        Commands::Crawl => run_crawler(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: Option<&Path>) -> Result<RelayConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(RelayConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = Path::new(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(RelayConfig::load_from_file(path)?);
        }
    }

    info!("No configuration file found, using defaults and environment");
    Ok(RelayConfig::from_env()?)
}

async fn run_stage(stage: Stage, config: RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        stage = %stage,
        input_queue = stage.input_queue(),
        host = %config.broker.host,
        port = config.broker.port,
        "Starting relay worker"
    );

    // Registered before connecting so a signal during startup is not lost
    let signals = ShutdownSignals::install()?;

    let metrics = Arc::new(WorkerMetrics::new(stage.name()));
    let broker = AmqpTransport::new(config.broker.clone());
    let mut worker = stage.worker(broker, &config).with_metrics(metrics.clone());

    let (stop_tx, mut stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        let name = signals.recv().await;
        info!("Received {}, finishing current message", name);
        let _ = stop_tx.send(true);
    });

    if !worker.start_unless_stopped(&mut stop_rx).await? {
        return Ok(());
    }

    let result = worker.run(stop_rx).await;

    match serde_json::to_string(&metrics.snapshot()) {
        Ok(json) => info!(metrics = %json, "Final worker metrics"),
        Err(e) => warn!("Could not serialize metrics: {}", e),
    }

    result?;
    Ok(())
}

/// SIGINT and SIGTERM streams
struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
}

impl ShutdownSignals {
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Name of the first signal received
    async fn recv(mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

async fn run_crawler(config: RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let broker = AmqpTransport::new(config.broker.clone());
    let mut crawler = MockCrawler::new(broker, &config.crawler);

    let report = crawler.run(&mock_tweets()).await?;
    if report.aborted {
        warn!(published = report.published, "Crawl stopped early");
    }
    Ok(())
}

fn handle_config_command(config: &RelayConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
