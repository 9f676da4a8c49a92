//! Vantage Kubernetes Operator
//!
//! Keeps Vantage analytic database clusters healthy on Kubernetes:
//! restarts down nodes, recovers whole-cluster outages, and remaps node
//! addresses after pod reschedules.

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

mod controller;
mod crd;
mod error;
mod events;
mod exec;
mod metrics;
mod names;
mod outcome;
mod parse;
mod paths;
mod platform;
mod podfacts;
mod probes;
mod reip;
mod restart;
mod status;
mod version;

use controller::Controller;

#[derive(Parser, Debug)]
#[command(name = "vantage-operator")]
#[command(about = "Kubernetes Operator for Vantage analytic database clusters")]
struct Args {
    /// Namespace to watch (empty for all namespaces)
    #[arg(short, long, default_value = "")]
    namespace: String,

    /// Metrics server port
    #[arg(short, long, default_value = "8080")]
    metrics_port: u16,

    /// Health check port
    #[arg(short = 'H', long, default_value = "8081")]
    health_port: u16,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Vantage Kubernetes Operator");
    info!(namespace = %args.namespace, "Watching namespace");

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::run_metrics_server(args.metrics_port));

    // Start health server
    let health_handle = tokio::spawn(run_health_server(args.health_port));

    let cluster_controller = Controller::new(args.namespace).await?;
    let cluster_handle = tokio::spawn(async move {
        if let Err(e) = cluster_controller.run().await {
            error!(error = %e, "Cluster controller error");
        }
    });

    info!("Controller started");

    // Wait for any task to complete (usually due to shutdown signal)
    tokio::select! {
        _ = cluster_handle => info!("Cluster controller stopped"),
        _ = metrics_handle => info!("Metrics server stopped"),
        _ = health_handle => info!("Health server stopped"),
    }

    Ok(())
}

async fn run_health_server(port: u16) {
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.unwrap();
    info!(port = %port, "Health server started");

    loop {
        if let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;

                let response = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nOK";
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    }
}
