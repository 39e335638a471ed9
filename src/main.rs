//! # cameradar
//!
//! RTSP camera scanner. `serve` exposes scans over WebSocket; `scan` runs a
//! single scan from the terminal and prints what it found.

#![deny(unsafe_code)]

mod report;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::Level;

use cameradar_core::engine::{AttackOptions, Dictionaries, DiscoverOptions, Engine};
use cameradar_core::scan::ScanMode;
use cameradar_engine::CommandEngine;
use cameradar_server::{ConnectionConfig, ScanDriver, ServerConfig};
use cameradar_settings::{
    cameradar_home, load_settings_from_path, parse_port_list, resolve_home_path, settings_path,
    CameradarSettings,
};
use cameradar_telemetry::{init_telemetry, MetricsRecorder, TelemetryConfig};

/// Discover RTSP cameras and brute-force their routes and credentials.
#[derive(Parser, Debug)]
#[command(name = "cameradar", version, about)]
struct Cli {
    /// Settings file (defaults to ~/.cameradar/settings.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Routes dictionary path.
    #[arg(long, global = true)]
    routes: Option<String>,

    /// Credentials dictionary path.
    #[arg(long, global = true)]
    credentials: Option<String>,

    /// Engine program to run for discovery and attacks.
    #[arg(long, global = true)]
    engine: Option<String>,

    /// Emit JSON log lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the WebSocket scan server (default).
    Serve(ServeArgs),
    /// Scan a target once and print the results.
    Scan(ScanArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Target to scan, e.g. 172.16.100.0/24 or a hostname.
    #[arg(short, long)]
    target: String,

    /// Ports to probe, e.g. 554,8554 or 8000-8010.
    #[arg(short, long)]
    ports: Option<String>,

    /// Discovery speed preset, 0 (slowest) to 5.
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=5))]
    speed: Option<u8>,

    /// Attack attempt timeout in milliseconds.
    #[arg(short = 'T', long)]
    timeout: Option<u64>,

    /// Show the engine's own output.
    #[arg(short, long)]
    log: bool,

    /// Routes dictionary path.
    #[arg(short = 'r', long)]
    custom_routes: Option<String>,

    /// Credentials dictionary path.
    #[arg(short = 'c', long)]
    custom_credentials: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("\u{2716} {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let path = cli.config.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;

    if let Some(routes) = &cli.routes {
        settings.dictionaries.routes.clone_from(routes);
    }
    if let Some(credentials) = &cli.credentials {
        settings.dictionaries.credentials.clone_from(credentials);
    }
    if let Some(engine) = &cli.engine {
        settings.engine.program.clone_from(engine);
    }
    settings.logging.json |= cli.json_logs;

    match cli.command {
        Some(Command::Scan(args)) => scan(settings, args).await,
        Some(Command::Serve(args)) => serve(settings, args).await,
        None => serve(settings, ServeArgs::default()).await,
    }
}

fn telemetry_config(settings: &CameradarSettings, fallback: Level) -> TelemetryConfig {
    let module_levels = settings
        .logging
        .modules
        .iter()
        .filter_map(|(module, level)| match Level::from_str(level) {
            Ok(level) => Some((module.clone(), level)),
            Err(_) => {
                eprintln!("ignoring log level {level:?} for module {module}");
                None
            }
        })
        .collect();
    TelemetryConfig {
        log_level: Level::from_str(&settings.logging.level).unwrap_or(fallback),
        module_levels,
        json: settings.logging.json,
    }
}

fn load_dictionaries(settings: &CameradarSettings) -> Result<Arc<Dictionaries>> {
    let home = cameradar_home();
    let routes = resolve_home_path(&home, &settings.dictionaries.routes);
    let credentials = resolve_home_path(&home, &settings.dictionaries.credentials);
    let dictionaries = Dictionaries::load(&routes, &credentials).context("invalid dictionary")?;
    tracing::info!(
        routes = %routes.display(),
        credentials = %credentials.display(),
        "dictionaries loaded"
    );
    Ok(Arc::new(dictionaries))
}

fn build_driver(
    settings: &CameradarSettings,
    dictionaries: Arc<Dictionaries>,
    metrics: Arc<MetricsRecorder>,
) -> ScanDriver {
    let engine: Arc<dyn Engine> = Arc::new(CommandEngine::new(
        settings.engine.program.clone(),
        settings.engine.args.clone(),
    ));
    ScanDriver::new(engine, dictionaries, metrics)
        .with_discover_options(DiscoverOptions {
            speed: settings.scan.speed,
            logging: settings.scan.enable_logs,
        })
        .with_attack_options(AttackOptions {
            timeout: Duration::from_millis(settings.scan.attack_timeout_ms),
            logging: settings.scan.enable_logs,
        })
}

async fn serve(mut settings: CameradarSettings, args: ServeArgs) -> Result<()> {
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    let telemetry = init_telemetry(telemetry_config(&settings, Level::INFO));
    let dictionaries = load_dictionaries(&settings)?;
    let driver = build_driver(&settings, dictionaries, telemetry.metrics());

    let config = ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        default_ports: settings.scan.default_ports.clone(),
        connection: ConnectionConfig {
            send_queue_capacity: settings.server.send_queue_capacity,
            drain_timeout: Duration::from_millis(settings.server.drain_timeout_ms),
            heartbeat_interval: Duration::from_millis(settings.server.heartbeat_interval_ms),
            client_timeout: Duration::from_millis(settings.server.client_timeout_ms),
        },
    };
    let handle = cameradar_server::start(config, driver, telemetry.metrics())
        .await
        .with_context(|| {
            format!(
                "failed to bind {}:{}",
                settings.server.host, settings.server.port
            )
        })?;

    tracing::info!(
        addr = %handle.local_addr(),
        engine = %settings.engine.program,
        "cameradar server ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    handle.shutdown().await;
    Ok(())
}

async fn scan(mut settings: CameradarSettings, args: ScanArgs) -> Result<()> {
    if let Some(speed) = args.speed {
        settings.scan.speed = speed;
    }
    if let Some(timeout) = args.timeout {
        settings.scan.attack_timeout_ms = timeout;
    }
    settings.scan.enable_logs |= args.log;
    if let Some(routes) = args.custom_routes {
        settings.dictionaries.routes = routes;
    }
    if let Some(credentials) = args.custom_credentials {
        settings.dictionaries.credentials = credentials;
    }
    let ports = match args.ports.as_deref() {
        Some(list) => parse_port_list(list).context("invalid --ports")?,
        None => settings.scan.default_ports.clone(),
    };

    let telemetry = init_telemetry(telemetry_config(&settings, Level::WARN));
    let dictionaries = load_dictionaries(&settings)?;
    let driver = build_driver(&settings, dictionaries, telemetry.metrics());

    tracing::info!(target = %args.target, ?ports, "starting scan");
    let streams = driver
        .run(&args.target, &ports, ScanMode::Both)
        .await
        .with_context(|| format!("scan of {} failed", args.target))?;

    print!("{}", report::render(&streams));
    Ok(())
}
