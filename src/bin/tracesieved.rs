//! Binary entry point: wires CLI config, logging, the trace buffer,
//! policy engine, forwarder, scheduler, and the ingress/metrics HTTP
//! servers together, then coordinates graceful shutdown.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tracesieve::config::Cli;
use tracesieve::metrics::{self, ProxyMetrics};
use tracesieve::proxy::buffer::TraceBuffer;
use tracesieve::proxy::forwarder::Forwarder;
use tracesieve::proxy::ingress::{self, IngressState};
use tracesieve::proxy::policy::PolicyEngine;
use tracesieve::proxy::scheduler::{Scheduler, SchedulerConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "startup failed");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let policy = Arc::new(PolicyEngine::load(&cli.policy_file)?);

    let forwarder = match &cli.collector_url {
        Some(url) if !url.is_empty() => Some(Arc::new(Forwarder::start(
            url,
            cli.forwarder_buffer_size,
            cli.forwarder_workers,
        )?)),
        _ => {
            info!("no --collector-url configured, running in dry-run mode");
            None
        }
    };

    let buffer = Arc::new(TraceBuffer::new());
    let metrics = Arc::new(ProxyMetrics::new());

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let scheduler = Scheduler::new(
        buffer.clone(),
        policy.clone(),
        forwarder.clone(),
        SchedulerConfig {
            flush_age: cli.flush_age(),
            abandon_age: cli.abandon_age(),
            flush_timeout: cli.flush_timeout(),
        },
        metrics.clone(),
    );

    let scheduler_shutdown = shutdown_tx.subscribe();
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(scheduler_shutdown).await;
    });

    let ingress_state = IngressState {
        buffer: buffer.clone(),
        metrics: metrics.clone(),
    };
    let ingress_addr = std::net::SocketAddr::from(([0, 0, 0, 0], cli.port));
    let ingress_listener = tokio::net::TcpListener::bind(ingress_addr).await?;
    info!(addr = %ingress_addr, "ingress listening");

    let metrics_addr = std::net::SocketAddr::from(([0, 0, 0, 0], cli.metrics_port));
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr).await?;
    info!(addr = %metrics_addr, "metrics listening");

    let mut ingress_shutdown = shutdown_tx.subscribe();
    let ingress_server = tokio::spawn(async move {
        axum::serve(ingress_listener, ingress::router(ingress_state))
            .with_graceful_shutdown(async move {
                let _ = ingress_shutdown.recv().await;
            })
            .await
    });

    let mut metrics_shutdown = shutdown_tx.subscribe();
    let metrics_server = tokio::spawn(async move {
        axum::serve(metrics_listener, metrics::router(metrics.clone()))
            .with_graceful_shutdown(async move {
                let _ = metrics_shutdown.recv().await;
            })
            .await
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping ingress and scheduler");
    let _ = shutdown_tx.send(());

    let _ = ingress_server.await;
    let _ = metrics_server.await;
    let _ = scheduler_handle.await;

    if let Some(forwarder) = forwarder {
        if let Ok(forwarder) = Arc::try_unwrap(forwarder) {
            forwarder.stop().await;
        }
    }

    info!("shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("installing SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(windows)]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
