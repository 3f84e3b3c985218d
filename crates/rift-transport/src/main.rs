use clap::Parser;
use rift_transport::config::ServerConfig;
use rift_transport::server::{FaultRouteHandler, HttpServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "rift-transport",
    version,
    about = "Rift transport server: connection faults, HTTPS interception and multipart parsing"
)]
struct Args {
    /// HTTP listener port (overrides the config file)
    #[arg(short, long, env = "RIFT_PORT")]
    port: Option<u16>,

    /// Path to a YAML configuration file
    #[arg(short, long, env = "RIFT_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind listeners to (overrides the config file)
    #[arg(long, env = "RIFT_BIND")]
    bind: Option<String>,
}

fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(port) = args.port {
        config.listen.port = port;
    }
    if let Some(bind) = args.bind {
        config.listen.bind_address = bind;
    }
    config.validate()?;

    let workers = match config.listen.workers {
        0 => num_cpus::get(),
        n => n,
    };
    info!("Starting rift-transport with {} worker threads", workers);

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()?
        .block_on(run(config))
}

async fn run(config: ServerConfig) -> Result<(), anyhow::Error> {
    let handler = Arc::new(FaultRouteHandler::new(config.fault_routes.clone()));
    let mut server = HttpServer::new(config, handler);
    server.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    server.stop().await
}
