use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use hibernate_proxy::{create_default_config, load_config, telemetry, HibernateProxy};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "hibernate-proxy.toml")]
    config: String,

    /// Override the configured listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short, long)]
    threads: Option<usize>,
}

fn main() -> Result<()> {
    hibernate_proxy::logging::init_logging();

    let args = Args::parse();

    let num_cpus = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1);
    let worker_threads = args.threads.unwrap_or(num_cpus);

    if worker_threads == 1 {
        info!("starting hibernation proxy with single-threaded runtime");
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        rt.block_on(run_proxy(args))
    } else {
        info!(
            "starting hibernation proxy with {} worker threads (detected {} CPUs)",
            worker_threads, num_cpus
        );
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .enable_all()
            .build()?;
        rt.block_on(run_proxy(args))
    }
}

async fn run_proxy(args: Args) -> Result<()> {
    // Load configuration
    let mut config = if std::path::Path::new(&args.config).exists() {
        match load_config(&args.config) {
            Ok(config) => config,
            Err(e) => {
                error!("failed to load config file '{}': {}", args.config, e);
                error!("please check your config file syntax and try again");
                return Err(e);
            }
        }
    } else {
        warn!("config file '{}' not found, creating default", args.config);
        let default_config = create_default_config();
        let config_toml = toml::to_string_pretty(&default_config)?;
        std::fs::write(&args.config, &config_toml)?;
        info!("created default config file: {}", args.config);
        default_config
    };

    if let Some(port) = args.port {
        config.proxy.listen_port = port;
    }

    info!(
        "managing backend at {} ({} {})",
        config.backend_addr(),
        config.backend.command,
        config.backend.args.join(" ")
    );
    if config.proxy.enable_query {
        warn!("enable_query is set, but the query protocol is not served");
    }

    let proxy = HibernateProxy::new(config)?;
    let config = Arc::clone(proxy.config());

    // background telemetry printers
    telemetry::spawn_data_usage_printer(Arc::clone(proxy.stats()), Arc::clone(&config));
    telemetry::spawn_resource_usage_printer(Arc::clone(proxy.controller()), Arc::clone(&config));

    // pre-warm so the first idle freeze is a cheap suspend instead of a
    // cold stop/start cycle
    if config.hibernation.allow_suspend {
        info!("backend will now pre-warm (allow_suspend is enabled)...");
        if let Err(e) = proxy.warm().await {
            error!("pre-warm failed: {e}");
        }
    }

    // graceful shutdown: stop the backend before exiting
    let proxy_for_shutdown = Arc::clone(&proxy);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, stopping the backend...");
        proxy_for_shutdown.shutdown().await;
        info!("graceful shutdown complete");
        std::process::exit(0);
    });

    let listen_addr = config.listen_addr();
    let listener = match TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {listen_addr}: {e}");
            return Err(e.into());
        }
    };

    proxy.serve(listener).await
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
