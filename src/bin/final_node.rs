//! Marker dispatch node: feeds in over one local socket, goals out over another.
//!
//! Usage: `final_node [config.json]`

use std::process::ExitCode;
use std::sync::Arc;

use marker_dispatch::ipc::{FeedListener, IpcTrajectoryClient};
use marker_dispatch::{
    ensure_executor_ready, DispatchConfig, DispatchError, DispatchLoop, JointStateCache, MarkerCache,
    RuleTable,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("marker_dispatch=info,final_node=info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), DispatchError> {
    let config = match std::env::args().nth(1) {
        Some(path) => DispatchConfig::from_json_file(path)?,
        None => DispatchConfig::default(),
    };
    config.validate()?;
    info!(node = %config.node_name, "Starting");

    let joints = JointStateCache::new();
    let markers = MarkerCache::new();
    let _feed = FeedListener::bind(&config.feed_ipc_name, joints.clone(), markers.clone())?;

    let executor = Arc::new(IpcTrajectoryClient::new(
        &config.executor_ipc_name,
        &config.trajectory_action,
    ));
    ensure_executor_ready(executor.as_ref(), &config).await?;

    let dispatch = DispatchLoop::new(RuleTable::stretch(), joints, markers, executor);
    dispatch
        .run(config.tick_period(), async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, so shutting down");
            }
        })
        .await;

    Ok(())
}
