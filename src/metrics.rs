//! Prometheus metrics for the Vantage operator

use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::info;

lazy_static::lazy_static! {
    /// Total reconciliations
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "vantage_operator_reconciliations_total",
        "Total number of reconciliations",
        &["cluster", "result"]
    ).unwrap();

    /// Node restart attempts
    pub static ref NODES_RESTART_ATTEMPT: CounterVec = register_counter_vec!(
        "vantage_operator_nodes_restart_attempts_total",
        "Total number of node restart attempts",
        &["cluster"]
    ).unwrap();

    /// Failed node restarts
    pub static ref NODES_RESTART_FAILED: CounterVec = register_counter_vec!(
        "vantage_operator_nodes_restart_failed_total",
        "Total number of failed node restarts",
        &["cluster"]
    ).unwrap();

    /// Node restart duration
    pub static ref NODES_RESTART_DURATION: HistogramVec = register_histogram_vec!(
        "vantage_operator_nodes_restart_duration_seconds",
        "Duration of node restart operations",
        &["cluster"]
    ).unwrap();

    /// Cluster restart attempts
    pub static ref CLUSTER_RESTART_ATTEMPT: CounterVec = register_counter_vec!(
        "vantage_operator_cluster_restart_attempts_total",
        "Total number of full cluster restart attempts",
        &["cluster"]
    ).unwrap();

    /// Failed cluster restarts
    pub static ref CLUSTER_RESTART_FAILED: CounterVec = register_counter_vec!(
        "vantage_operator_cluster_restart_failed_total",
        "Total number of failed full cluster restarts",
        &["cluster"]
    ).unwrap();

    /// Cluster restart duration
    pub static ref CLUSTER_RESTART_DURATION: HistogramVec = register_histogram_vec!(
        "vantage_operator_cluster_restart_duration_seconds",
        "Duration of full cluster restart operations",
        &["cluster"]
    ).unwrap();
}

/// Run the metrics server
pub async fn run_metrics_server(port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.unwrap();
    info!(port = %port, "Metrics server started");

    loop {
        if let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;

                let encoder = TextEncoder::new();
                let metric_families = prometheus::gather();
                let metrics = encoder.encode_to_string(&metric_families).unwrap_or_default();

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
                    metrics.len(),
                    metrics
                );
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    }
}

/// Record a reconciliation result
pub fn record_reconciliation(cluster: &str, result: &str) {
    RECONCILIATIONS.with_label_values(&[cluster, result]).inc();
}

/// Record a node restart attempt and how long it took
pub fn observe_nodes_restart(cluster: &str, duration_secs: f64) {
    NODES_RESTART_ATTEMPT.with_label_values(&[cluster]).inc();
    NODES_RESTART_DURATION
        .with_label_values(&[cluster])
        .observe(duration_secs);
}

/// Record a failed node restart
pub fn inc_nodes_restart_failed(cluster: &str) {
    NODES_RESTART_FAILED.with_label_values(&[cluster]).inc();
}

/// Record a cluster restart attempt and how long it took
pub fn observe_cluster_restart(cluster: &str, duration_secs: f64) {
    CLUSTER_RESTART_ATTEMPT.with_label_values(&[cluster]).inc();
    CLUSTER_RESTART_DURATION
        .with_label_values(&[cluster])
        .observe(duration_secs);
}

/// Record a failed cluster restart
pub fn inc_cluster_restart_failed(cluster: &str) {
    CLUSTER_RESTART_FAILED.with_label_values(&[cluster]).inc();
}
