//! membership-daemon: runs the membership reconciler against recorded gossip.
//!
//! Gossip and consensus are in-memory stand-ins here: LAN and WAN events are
//! replayed from a JSON-lines file and peers are added to an in-memory peer
//! set. On shutdown the reconciled state is printed as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use membership_core::{
    CancellationToken, InMemoryPeerSet, ReconcileEvent, Reconciler, ReconcilerConfig,
    StaticMembers, EVENT_CHANNEL_CAPACITY,
};
use membership_daemon::{feed, load_events, ClusterReport};

#[derive(Parser, Debug)]
#[command(name = "membership-daemon")]
#[command(about = "Reconcile gossip membership into consensus peers and a WAN directory")]
struct Args {
    /// Name of this node in the LAN pool (generated if not provided)
    #[arg(long, env = "RECONCILE_NODE_NAME")]
    node_name: Option<String>,

    /// Datacenter this node serves
    #[arg(short, long, env = "RECONCILE_DATACENTER", default_value = "dc1")]
    datacenter: String,

    /// JSON-lines file of LAN/WAN events to replay
    #[arg(short, long)]
    events: Option<PathBuf>,

    /// Milliseconds between join attempts
    #[arg(long, default_value_t = 500)]
    retry_interval_ms: u64,

    /// Stop once the event file is replayed instead of waiting for Ctrl+C
    #[arg(long)]
    exit_when_drained: bool,

    /// Milliseconds to let join tasks settle before exiting when drained
    #[arg(long, default_value_t = 2000)]
    settle_ms: u64,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,membership_daemon=debug,membership_core=debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let node_name = args.node_name.unwrap_or_else(|| {
        let name = format!("node-{}", uuid::Uuid::new_v4());
        info!("Generated node name: {}", name);
        name
    });

    let config = ReconcilerConfig::new(node_name, args.datacenter)?
        .with_join_retry_interval(Duration::from_millis(args.retry_interval_ms))?;
    info!(
        "Starting membership-daemon (node: {}, datacenter: {})",
        config.node_name, config.datacenter
    );

    let lan_members = Arc::new(StaticMembers::new());
    let peers = Arc::new(InMemoryPeerSet::new());
    let shutdown = CancellationToken::new();
    let reconciler = Reconciler::new(config, lan_members.clone(), peers.clone(), shutdown.clone());

    let _log_joins = reconciler.events().subscribe_where(
        |event| matches!(event, ReconcileEvent::JoinFinished { .. }),
        |event| {
            if let ReconcileEvent::JoinFinished { member, outcome } = event {
                debug!("Join task for {} ended: {:?}", member, outcome);
            }
        },
    );

    let (lan_tx, lan_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (wan_tx, wan_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (lan_task, wan_task) = reconciler.spawn_handlers(lan_rx, wan_rx);

    if let Some(path) = &args.events {
        let events = load_events(path)
            .await
            .with_context(|| format!("loading events from {}", path.display()))?;
        let delivered = feed(events, &lan_members, &lan_tx, &wan_tx).await?;
        info!("Replayed {} event(s) from {}", delivered, path.display());
    }

    if args.exit_when_drained {
        // Closing the sources lets both handlers finish the queued events.
        drop(lan_tx);
        drop(wan_tx);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(args.settle_ms)) => {}
            _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
        }
    } else {
        info!("Reconciler running. Press Ctrl+C to stop.");
        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl+C")?;
        info!("Shutdown signal received");
    }

    shutdown.cancel();
    for (view, task) in [("LAN", lan_task), ("WAN", wan_task)] {
        if let Err(e) = task.await {
            warn!("{} event handler ended abnormally: {}", view, e);
        }
    }

    let report = ClusterReport::collect(&reconciler, peers.as_ref()).await;
    println!("{}", report.to_json()?);

    info!("Shutting down");
    Ok(())
}
