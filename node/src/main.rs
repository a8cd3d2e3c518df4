// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! `ddpoa-node` — the binary that wires the `ddpoa-engine` driver loop to a
//! real host validator over ZMQ and to its peer fleet over TCP.
//!
//! Grounded on `examples/alissonlinneker-nova-protocol/node/src/main.rs`'s
//! shape: parse CLI, init logging, build the long-running services, run
//! until a shutdown signal, exit with the right status code. The consensus
//! logic itself lives entirely in `ddpoa-engine`; this crate only supplies
//! the concrete `HostChannel` (`host_zmq`), the metrics HTTP surface, and
//! process lifecycle.

mod cli;
mod host_zmq;
mod logging;
mod metrics;

use std::process::ExitCode;

use clap::Parser;
use ddpoa_engine::driver::Driver;
use ddpoa_engine::error::ConfigError;
use ddpoa_engine::host::HostChannel;
use ddpoa_engine::node::NodeState;
use ddpoa_engine::overlay::PeerOverlay;
use tokio::sync::watch;
use tracing::{error, info};

use cli::DdpoaCli;
use host_zmq::ZmqHostChannel;
use metrics::{metrics_handler, EngineMetrics};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = DdpoaCli::parse();
    logging::init_logging(cli.default_log_level());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal configuration error, shutting down");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: DdpoaCli) -> Result<(), ConfigError> {
    info!(connect = %cli.connect, component = %cli.component, "starting ddpoa-node");

    let mut host = ZmqHostChannel::connect(&cli.connect, &cli.component);

    let settings = host
        .get_settings()
        .await
        .map_err(|e| ConfigError::MissingSetting(e.to_string()))?;

    if settings.members.len() != settings.member_ips.len() {
        return Err(ConfigError::MemberIpMismatch {
            members: settings.members.len(),
            ips: settings.member_ips.len(),
        });
    }
    if settings.num_slots == 0 {
        return Err(ConfigError::InvalidSlots("num_slots must be at least 1".into()));
    }

    let self_key = host
        .local_peer_id()
        .await
        .map_err(|e| ConfigError::MissingSetting(e.to_string()))?;

    let (overlay, inbound) = PeerOverlay::spawn(
        self_key.clone(),
        ddpoa_engine::config::PEER_RPC_PORT,
        &settings.members,
        &settings.member_ips,
    );

    let metrics = std::sync::Arc::new(EngineMetrics::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics_task = tokio::spawn(serve_metrics(metrics.clone(), shutdown_rx.clone()));
    let signal_task = tokio::spawn(wait_for_shutdown_signal(shutdown_tx));

    // A chain head already past genesis means another node produced blocks
    // before this one joined (or it's rejoining after an outage) — it
    // cannot trust its own view of the chain until it bootstraps from a
    // peer, rather than assuming it's present for the very first epoch.
    let chain_head = host
        .get_chain_head()
        .await
        .map_err(|e| ConfigError::MissingSetting(e.to_string()))?;

    let mut driver = Driver::new(self_key, host, overlay, inbound, settings).with_metrics(metrics.clone());
    if !chain_head.previous_id.is_genesis() {
        info!(chain_head = %chain_head.id, "chain head is past genesis, starting in WAITING_FOR_BOOTSTRAP");
        driver.set_initial_state(NodeState::WaitingForBootstrap);
    }
    if let Err(e) = driver.run(shutdown_rx).await {
        error!(error = %e, "driver loop exited with an error");
    }

    signal_task.abort();
    let _ = metrics_task.await;
    info!("ddpoa-node shut down cleanly");
    Ok(())
}

/// Serves `/metrics` on `127.0.0.1:9100` until `shutdown` fires. Port and
/// bind address are fixed rather than CLI-configurable — the metrics
/// surface is an ambient operational concern, not part of the consensus
/// engine's own wire contract (§6), so it doesn't compete for CLI flag
/// space with the `-C/--connect`/`--component` endpoints.
async fn serve_metrics(metrics: metrics::SharedMetrics, mut shutdown: watch::Receiver<bool>) {
    let app = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics_handler))
        .with_state(metrics);

    let listener = match tokio::net::TcpListener::bind("127.0.0.1:9100").await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "failed to bind metrics listener");
            return;
        }
    };
    info!("metrics listening on 127.0.0.1:9100");

    let shutdown_signal = async move {
        let _ = shutdown.wait_for(|v| *v).await;
    };
    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal).await {
        error!(error = %e, "metrics server exited with an error");
    }
}

async fn wait_for_shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received ctrl-c");
    }
    let _ = shutdown_tx.send(true);
}
