//! Multiroom Gateway
//!
//! Starts the engine pool and the mixer, then serves the WebSocket gateway
//! until SIGINT/SIGTERM. SIGHUP re-renders every config and restarts the
//! workers.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use multiroom_gateway::{
    config::AppConfig,
    logging::init_logging,
    supervisor::Workers,
    template::ConfigTemplater,
    ui::WebServer,
};

const DEFAULT_CONFIG_PATH: &str = "/etc/multiroom-gateway/gateway.json";

#[derive(Parser, Debug)]
#[command(name = "gateway", version, about = "Multiroom audio gateway")]
struct Args {
    /// Configuration file (.json or .toml)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Listen port, overrides `gateway.port`
    #[arg(long)]
    port: Option<u16>,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// debug, info or warning
    #[arg(long, default_value = "info")]
    loglevel: String,

    /// Shorthand for --loglevel debug
    #[arg(short, long)]
    debug: bool,

    /// Start even if the engine or mixer binary is not on PATH
    #[arg(long)]
    skip_dependency_check: bool,
}

enum ControlSignal {
    Shutdown,
    Reconfigure,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { args.loglevel.as_str() };
    let _log_guard = init_logging(level, args.logfile.as_deref())?;

    tracing::info!("Starting multiroom gateway {}", env!("CARGO_PKG_VERSION"));

    let mut workers = Workers::new();
    let result = run(args, &mut workers).await;

    tokio::task::block_in_place(|| workers.shutdown());

    if let Err(e) = &result {
        tracing::error!("Gateway failed: {:#}", e);
    } else {
        tracing::info!("Gateway stopped");
    }
    result
}

async fn run(args: Args, workers: &mut Workers) -> Result<()> {
    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    if let Some(port) = args.port {
        config.gateway.port = port;
    }
    let config = Arc::new(config);

    if args.skip_dependency_check {
        tracing::warn!("Skipping dependency check");
    } else {
        check_dependencies(&config)?;
    }

    let templater = Arc::new(ConfigTemplater::new(config.templates.path.as_deref())?);

    // Installed before any worker starts so an early SIGTERM still goes
    // through the orderly shutdown path
    let mut signals = Signals::new()?;

    let server = WebServer::new(Arc::clone(&config));
    let launch = workers.launch(Arc::clone(&config), templater, |_| server.bind());
    let listener = tokio::select! {
        result = launch => result?,
        () = signals.shutdown_requested() => {
            tracing::info!("Shutdown requested during startup");
            return Ok(());
        }
    };

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server_task = tokio::spawn(server.serve(listener, async {
        let _ = stop_rx.await;
    }));

    loop {
        tokio::select! {
            signal = signals.next() => match signal {
                ControlSignal::Shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                ControlSignal::Reconfigure => {
                    tracing::info!("Reconfiguring workers");
                    tokio::task::block_in_place(|| workers.reconfigure());
                }
            },
            result = &mut server_task => {
                result.context("server task panicked")??;
                bail!("server stopped unexpectedly");
            }
        }
    }

    let _ = stop_tx.send(());
    server_task.await.context("server task panicked")??;
    Ok(())
}

/// Fail if the engine or mixer binary cannot be found
fn check_dependencies(config: &AppConfig) -> Result<()> {
    let missing: Vec<&str> = [config.engine.binary.as_str(), config.mixer.binary.as_str()]
        .into_iter()
        .filter(|binary| match which::which(binary) {
            Ok(path) => {
                tracing::debug!("Found {} at {}", binary, path.display());
                false
            }
            Err(_) => true,
        })
        .collect();

    if !missing.is_empty() {
        bail!("missing dependencies: {}", missing.join(", "));
    }
    Ok(())
}

impl Signals {
    /// Wait for a stop signal; hang-ups are ignored until startup is done
    async fn shutdown_requested(&mut self) {
        loop {
            match self.next().await {
                ControlSignal::Shutdown => return,
                ControlSignal::Reconfigure => {
                    tracing::warn!("Ignoring SIGHUP while starting up");
                }
            }
        }
    }
}

#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn next(&mut self) -> ControlSignal {
        tokio::select! {
            _ = self.interrupt.recv() => ControlSignal::Shutdown,
            _ = self.terminate.recv() => ControlSignal::Shutdown,
            _ = self.hangup.recv() => ControlSignal::Reconfigure,
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> ControlSignal {
        let _ = tokio::signal::ctrl_c().await;
        ControlSignal::Shutdown
    }
}
