//! Orchestrator daemon entry point.

use clap::Parser;
use orchestrator_daemon::{AuthManager, DaemonConfig, EventPublisher, MetricsCollector, UnixSocketRpcServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "orchestrator-daemon",
    about = "control plane for cluster federation, routing, roles, and task decomposition",
    version = env!("CARGO_PKG_VERSION")
)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the RPC socket path
    #[arg(long, value_name = "PATH")]
    socket_path: Option<PathBuf>,

    /// Enable JWT authentication
    #[arg(long)]
    enable_auth: bool,

    /// JWT secret (required if --enable-auth)
    #[arg(long, value_name = "SECRET")]
    jwt_secret: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(args.log_level.parse()?))
        .with_target(false)
        .with_line_number(true)
        .init();

    info!(version = orchestrator_daemon::VERSION, "starting orchestrator daemon");

    let mut config = DaemonConfig::load_or_default(args.config.as_deref())?;
    if let Some(path) = args.socket_path {
        config.rpc.socket_path = path;
    }
    if args.enable_auth {
        config.auth.enabled = true;
        match args.jwt_secret {
            Some(secret) => config.auth.jwt_secret = secret,
            None => {
                eprintln!("--jwt-secret is required when --enable-auth is set");
                std::process::exit(1);
            }
        }
    }
    config.validate()?;

    info!(socket = ?config.rpc.socket_path, auth_enabled = config.auth.enabled, "loaded configuration");

    let local_runtime = orchestrator_core::local_runtime::InProcessRuntime::new(64);
    let orchestrator = Arc::new(orchestrator_core::Orchestrator::new(config.orchestrator.clone(), local_runtime).await?);

    let auth = Arc::new(AuthManager::new(config.auth.clone()));
    let metrics = Arc::new(MetricsCollector::new().map_err(|e| anyhow::anyhow!(e.to_string()))?);
    let events = Arc::new(
        EventPublisher::bind(&config.events.bind_addr, config.events.port)
            .await
            .map_err(|e| anyhow::anyhow!(e))?,
    );
    tokio::spawn(events.clone().forward_forever(orchestrator.events.clone()));

    let rpc_server = UnixSocketRpcServer::new(&config, orchestrator.clone(), auth, metrics, events);
    let mut handle = rpc_server.start(orchestrator.clone()).await?;

    tokio::signal::ctrl_c().await?;
    info!("received ctrl-c, shutting down");

    handle.stop();
    orchestrator.shutdown();
    info!("orchestrator daemon stopped");
    Ok(())
}
