//! Meshwatch Daemon - mesh router telemetry collector
//!
//! Polls the mesh for nodeinfo, statistics and neighbours, keeps per-node
//! state with liveness tracking, and serves topology, snapshot and metrics
//! over HTTP.

use anyhow::{Context, Result};
use clap::Parser;
use meshwatch_common::config::CONFIG_PATH;
use meshwatch_common::graph::GraphGenerator;
use meshwatch_common::import::import_nodes_file;
use meshwatch_common::liveness::LivenessJobs;
use meshwatch_common::scheduler::schedule;
use meshwatch_common::snapshot::NodesGenerator;
use meshwatch_common::{open_store, CollectorConfig, EngineOptions};
use meshwatchd::metrics::CollectorMetrics;
use meshwatchd::pipeline::Pipeline;
use meshwatchd::poller;
use meshwatchd::readers::default_readers;
use meshwatchd::server::{self, AppState};
use meshwatchd::transport::{MultiTransport, Transport, UdpRequester};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "meshwatchd", version, about = "Mesh router telemetry collector")]
struct Args {
    /// Path to the configuration file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Import a legacy meshviewer nodes.json before starting
    #[arg(long)]
    import: Option<PathBuf>,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = CollectorConfig::load_from(&args.config)?;
    init_logging(&config.logger.level);
    if !args.config.exists() {
        warn!("Config file {} not found, using defaults", args.config.display());
    }

    info!("Meshwatch Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    // Store
    let options = EngineOptions::from_config(&config.store, &config.announced);
    let store = open_store(&config.store.engine, &options)
        .with_context(|| format!("Failed to open {} store", config.store.engine))?;

    if let Some(path) = &args.import {
        let imported = import_nodes_file(store.as_ref(), path)
            .with_context(|| format!("Failed to import {}", path.display()))?;
        info!("Imported {} nodes from {}", imported, path.display());
    }

    // Metrics are seeded from what the store already holds
    let metrics = Arc::new(
        CollectorMetrics::new(&config.prometheus).context("Failed to register metrics")?,
    );
    metrics
        .replay(store.as_ref())
        .context("Failed to replay store into metrics")?;
    metrics.register_callbacks(store.as_ref());

    let listener = server::bind(&config.http.listen).await?;

    let liveness = LivenessJobs::start(Arc::clone(&store), config.liveness());
    let pipeline = Pipeline::start(Arc::clone(&store), default_readers(Arc::clone(&metrics)));

    // Transport
    let mut requesters = Vec::with_capacity(config.receiver.len());
    let mut receive_tasks = Vec::with_capacity(config.receiver.len());
    for receiver in &config.receiver {
        let requester = UdpRequester::open(receiver, config.announced.port)
            .await
            .with_context(|| format!("Failed to open receiver on {}", receiver.interface))?;
        receive_tasks.push(requester.start_receiving(pipeline.sender()));
        requesters.push(Arc::new(requester));
    }
    let transport = Arc::new(MultiTransport::new(requesters));
    let query_transport: Arc<dyn Transport> = transport.clone();
    poller::register_offline_requery(&store, Arc::clone(&query_transport));
    let query_jobs = poller::start_query_jobs(query_transport, &config.announced);

    // Meshviewer output
    let graph = Arc::new(GraphGenerator::new(
        Arc::clone(&store),
        config.meshviewer.graph_path.clone(),
    ));
    let nodes = Arc::new(NodesGenerator::new(
        Arc::clone(&store),
        config.meshviewer.nodes_path.clone(),
    ));
    let regenerate = {
        let graph = Arc::clone(&graph);
        let nodes = Arc::clone(&nodes);
        schedule(
            "meshviewer-regenerate",
            Duration::from_secs(config.meshviewer.regenerate_interval_secs),
            true,
            move || {
                let graph = Arc::clone(&graph);
                let nodes = Arc::clone(&nodes);
                async move {
                    let result = tokio::task::spawn_blocking(move || {
                        graph.regenerate();
                        nodes.regenerate();
                    })
                    .await;
                    if let Err(e) = result {
                        error!("Meshviewer regeneration panicked: {}", e);
                    }
                }
            },
        )
    };

    // HTTP
    let state = Arc::new(AppState {
        store: Arc::clone(&store),
        graph,
        nodes,
        metrics,
    });
    let (http_stop_tx, http_stop_rx) = oneshot::channel::<()>();
    let http = tokio::spawn(async move {
        let shutdown = async move {
            let _ = http_stop_rx.await;
        };
        if let Err(e) = server::run(listener, state, shutdown).await {
            error!("HTTP server stopped: {:#}", e);
        }
    });

    info!("Meshwatch Daemon ready");
    wait_for_signal().await;
    info!("Shutting down gracefully");

    for job in query_jobs {
        job.shutdown().await;
    }
    regenerate.shutdown().await;
    liveness.shutdown().await;

    transport.close();
    for task in receive_tasks {
        if let Err(e) = task.await {
            error!("Receiver task panicked: {}", e);
        }
    }
    drop(transport);

    let applied = pipeline.shutdown().await;
    info!("Applied {} records", applied);

    let _ = http_stop_tx.send(());
    if let Err(e) = http.await {
        error!("HTTP task panicked: {}", e);
    }

    store.close().context("Failed to close store")?;
    info!("Stopped");
    Ok(())
}
