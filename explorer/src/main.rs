//! Vanta explorer backend - main entry point.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use consensus_core::ChainParams;
use rpc_core::{NodeApi, NodeNotification};
use stakedb::StakeDatabase;
use vanta_explorer::charts::ChartsCache;
use vanta_explorer::cli;
use vanta_explorer::config::Config;
use vanta_explorer::database::ChainDb;
use vanta_explorer::error::{ExplorerError, Result};
use vanta_explorer::indexer::reorg::{ReorgCoordinator, ReorgData};
use vanta_explorer::indexer::service::SyncEngine;
use vanta_explorer::indexer::SyncProgress;
use vanta_explorer::rpc_client::{start_notification_listener, NodeClient};
use vanta_explorer::sources::{ChainSummarySource, DataSources};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    info!("starting vanta-explorer");

    let mut config = match &args.config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.apply_cli_overrides(&args);
    config.validate()?;

    let params = ChainParams::from_name(&config.network)
        .map_err(|e| ExplorerError::Config(e.to_string()))?;
    info!("network: {}", params.name);

    // Embedded stake database.
    let stake_dir = config.db.data_dir.join(params.name).join("stakedb");
    std::fs::create_dir_all(&stake_dir)?;
    let stake_db = Arc::new(StakeDatabase::open(&stake_dir, params.clone())?);
    info!("stake db at height {}", stake_db.height());

    // Node connection.
    let node = Arc::new(NodeClient::new(
        &config.node.rpc_url,
        &config.node.rpc_user,
        &config.node.rpc_pass,
    ));
    let best = node.best_block().await?;
    info!("connected to vantad: tip {} at {}", best.hash, best.height);

    // Relational mirror, unless running lite.
    let chain_db = if config.db.lite {
        warn!("lite mode: relational store disabled, chart queries unavailable");
        None
    } else {
        let db = ChainDb::connect(&config.db.pg_url, params.clone()).await?;
        db.create_tables().await?;
        Some(db)
    };

    let charts = Arc::new(ChartsCache::new());
    let node_api: Arc<dyn NodeApi> = node.clone();
    // The aggregated query surface; the HTTP/websocket presentation layer
    // that consumes it is an external collaborator.
    let sources = Arc::new(DataSources::new(
        Arc::new(ChainSummarySource::new(node_api.clone(), stake_db.clone())),
        chain_db.clone(),
        charts.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    // Progress events feed the status websocket; a simple logging
    // consumer keeps the channel drained here.
    let (progress_tx, mut progress_rx) = mpsc::channel::<SyncProgress>(32);
    tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            info!(
                "sync progress: {}/{} {} {}",
                event.from, event.to, event.msg, event.subtitle
            );
        }
    });

    match chain_db {
        Some(db) => {
            run_full(
                node,
                db,
                stake_db,
                charts,
                sources,
                progress_tx,
                &config,
                shutdown_rx,
            )
            .await
        }
        None => run_lite(node_api, stake_db, shutdown_rx).await,
    }
}

/// Full mode: initial sync, side-chain import, then follow notifications.
#[allow(clippy::too_many_arguments)]
async fn run_full(
    node: Arc<NodeClient>,
    db: ChainDb,
    stake_db: Arc<StakeDatabase>,
    charts: Arc<ChartsCache>,
    sources: Arc<DataSources>,
    progress_tx: mpsc::Sender<SyncProgress>,
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let node_api: Arc<dyn NodeApi> = node.clone();
    let engine = SyncEngine::new(node_api.clone(), db.clone(), stake_db.clone())
        .with_progress(progress_tx, config.indexer.progress_log_interval);

    let height = engine.sync(shutdown.clone()).await?;
    info!("initial sync complete at height {height}");

    if let Err(e) = engine.import_side_chains().await {
        error!("side chain import failed: {e}");
    }

    let reorg = ReorgCoordinator::new(node_api, db, stake_db, charts);

    let (mut notifications, listener) = start_notification_listener(node.clone(), shutdown.clone());

    let mut shutdown_watch = shutdown.clone();
    loop {
        tokio::select! {
            _ = shutdown_watch.changed() => {
                if *shutdown_watch.borrow() {
                    break;
                }
            }
            notification = notifications.recv() => {
                match notification {
                    Ok(NodeNotification::BlockConnected { hash, height }) => {
                        info!("block connected: {hash} at {height}");
                        match engine.sync(shutdown.clone()).await {
                            Err(e) => error!("sync after block {hash} failed: {e}"),
                            Ok(tip) => {
                                // Refresh aggregate charts on the
                                // configured block cadence.
                                if tip > 0 && tip % config.indexer.charts_update_interval as i64 == 0 {
                                    let sources = sources.clone();
                                    tokio::spawn(async move {
                                        use vanta_explorer::charts::ChartType;
                                        if let Err(e) =
                                            sources.chart_data(ChartType::PoolSize, tip).await
                                        {
                                            warn!("charts refresh at {tip} failed: {e}");
                                        }
                                    });
                                }
                            }
                        }
                    }
                    Ok(NodeNotification::Reorg { old_tip, new_tip }) => {
                        if let Err(e) = reorg.handle_reorg(ReorgData { old_tip, new_tip }).await {
                            error!("reorg to {new_tip} failed: {e}");
                        }
                    }
                    Err(e) => {
                        warn!("notification stream lagged: {e}");
                    }
                }
            }
        }
    }

    listener.abort();
    info!("vanta-explorer stopped");
    Ok(())
}

/// Lite mode: keep only the stake database in step with the node.
async fn run_lite(
    node: Arc<dyn NodeApi>,
    stake_db: Arc<StakeDatabase>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        let best = node.best_block().await?.height as i64;
        while stake_db.height() < best {
            if *shutdown.borrow() {
                return Ok(());
            }
            let next = (stake_db.height() + 1) as u32;
            let block = node.block_by_height(next).await?;
            stake_db.connect_block(&block.block)?;
        }
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("vanta-explorer stopped");
                    return Ok(());
                }
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {}
        }
    }
}
