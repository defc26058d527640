//! Marker-driven motion dispatch for the Stretch mobile manipulator.
//!
//! This crate defines:
//! - [`cache`]: latest-snapshot caches for joint states and visible markers.
//! - [`rules::RuleTable`]: the marker-to-joint command rules and their bias state.
//! - [`dispatch::DispatchLoop`]: the periodic tick that turns visible markers into a single
//!   trajectory goal and submits it without waiting on the result.
//! - [`TrajectoryExecutor`]: the async contract for whatever runs the goal on the robot.
//! - [`ipc`]: local-socket adapters for the feeds and the executor.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod cache;
pub mod dispatch;
pub mod ipc;
pub mod msgs;
pub mod rules;

pub use cache::{JointStateCache, MarkerCache, MarkerSet};
pub use dispatch::{ensure_executor_ready, DispatchLoop, TickOutcome};
pub use msgs::{FeedMessage, JointCommand, JointState, MarkerArray, TrajectoryGoal, TrajectoryPoint};
pub use rules::{Bias, BiasChannel, BiasState, CommandRule, RuleOutcome, RuleTable, Target};

pub const DEFAULT_NODE_NAME: &str = "final_node";
pub const JOINT_STATES_TOPIC: &str = "/stretch/joint_states";
pub const VISIBLE_MARKERS_TOPIC: &str = "/aruco/visible_markers";
pub const TRAJECTORY_ACTION: &str = "stretch_controller/follow_joint_trajectory";

/// Seconds between dispatch ticks.
pub const DEFAULT_TICK_PERIOD_SECS: f64 = 2.0;

/// Seconds to wait for the trajectory executor at startup before giving up.
pub const DEFAULT_SERVER_TIMEOUT_SECS: f64 = 60.0;

/// Default IPC names for the snapshot feed and the trajectory executor.
///
/// On Unix these are filesystem-backed sockets in `/tmp` so separate processes can find them.
#[cfg(unix)]
pub const FEED_IPC_NAME: &str = "/tmp/marker_dispatch_feed";
#[cfg(unix)]
pub const EXECUTOR_IPC_NAME: &str = "/tmp/marker_dispatch_executor";

#[cfg(not(unix))]
pub const FEED_IPC_NAME: &str = "marker_dispatch_feed";
#[cfg(not(unix))]
pub const EXECUTOR_IPC_NAME: &str = "marker_dispatch_executor";

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("joint not found in current joint state: {0}")]
    JointNotFound(String),

    #[error("trajectory executor '{name}' not available after waiting {timeout:?}")]
    ExecutorUnavailable { name: String, timeout: Duration },

    #[error("trajectory executor is not connected")]
    NotConnected,

    #[error("trajectory executor is still busy with a previous goal")]
    ExecutorBusy,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The contract for anything that can execute a joint-trajectory goal.
///
/// Implementations accept goals asynchronously; the dispatch loop never inspects whether the
/// motion actually completes.
#[async_trait]
pub trait TrajectoryExecutor: Send + Sync {
    /// Blocks until the executor is reachable, returning `false` once `timeout` elapses.
    async fn wait_for_server(&self, timeout: Duration) -> bool;

    /// Hands a goal to the executor.
    async fn send_goal(&self, goal: TrajectoryGoal) -> Result<(), DispatchError>;
}

/// Runtime settings for a dispatch node. Missing fields fall back to the defaults above.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub node_name: String,
    pub joint_states_topic: String,
    pub markers_topic: String,
    pub trajectory_action: String,
    pub tick_period_secs: f64,
    pub server_timeout_secs: f64,
    pub feed_ipc_name: String,
    pub executor_ipc_name: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            node_name: DEFAULT_NODE_NAME.to_string(),
            joint_states_topic: JOINT_STATES_TOPIC.to_string(),
            markers_topic: VISIBLE_MARKERS_TOPIC.to_string(),
            trajectory_action: TRAJECTORY_ACTION.to_string(),
            tick_period_secs: DEFAULT_TICK_PERIOD_SECS,
            server_timeout_secs: DEFAULT_SERVER_TIMEOUT_SECS,
            feed_ipc_name: FEED_IPC_NAME.to_string(),
            executor_ipc_name: EXECUTOR_IPC_NAME.to_string(),
        }
    }
}

impl DispatchConfig {
    /// Loads and validates a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DispatchError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects durations that are negative, non-finite or too large, and a zero tick period.
    pub fn validate(&self) -> Result<(), DispatchError> {
        let period = secs_to_duration("tick_period_secs", self.tick_period_secs)?;
        if period.is_zero() {
            return Err(DispatchError::InvalidConfig(
                "tick_period_secs must be greater than zero".to_string(),
            ));
        }
        secs_to_duration("server_timeout_secs", self.server_timeout_secs)?;
        Ok(())
    }

    /// Tick period; an invalid value falls back to [`DEFAULT_TICK_PERIOD_SECS`].
    pub fn tick_period(&self) -> Duration {
        secs_to_duration("tick_period_secs", self.tick_period_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::from_secs_f64(DEFAULT_TICK_PERIOD_SECS))
    }

    /// Readiness timeout; an invalid value falls back to [`DEFAULT_SERVER_TIMEOUT_SECS`].
    pub fn server_timeout(&self) -> Duration {
        secs_to_duration("server_timeout_secs", self.server_timeout_secs)
            .unwrap_or(Duration::from_secs_f64(DEFAULT_SERVER_TIMEOUT_SECS))
    }
}

fn secs_to_duration(field: &str, secs: f64) -> Result<Duration, DispatchError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| DispatchError::InvalidConfig(format!("{field} = {secs}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_stretch_driver() {
        let config = DispatchConfig::default();
        assert_eq!(config.node_name, "final_node");
        assert_eq!(config.trajectory_action, "stretch_controller/follow_joint_trajectory");
        assert_eq!(config.tick_period(), Duration::from_secs(2));
        assert_eq!(config.server_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config: DispatchConfig =
            serde_json::from_str(r#"{"tick_period_secs": 0.5, "executor_ipc_name": "/tmp/exec"}"#)
                .expect("valid config");
        assert_eq!(config.tick_period(), Duration::from_millis(500));
        assert_eq!(config.executor_ipc_name, "/tmp/exec");
        assert_eq!(config.markers_topic, VISIBLE_MARKERS_TOPIC);
    }

    #[test]
    fn config_loads_from_file() {
        let path = std::env::temp_dir().join(format!("marker_dispatch_cfg_{}.json", std::process::id()));
        std::fs::write(&path, r#"{"node_name": "lab_node"}"#).unwrap();
        let config = DispatchConfig::from_json_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(config.node_name, "lab_node");
        assert_eq!(config.server_timeout_secs, DEFAULT_SERVER_TIMEOUT_SECS);
    }

    fn load(tag: &str, raw: &str) -> Result<DispatchConfig, DispatchError> {
        let path = std::env::temp_dir().join(format!("marker_dispatch_{tag}_{}.json", std::process::id()));
        std::fs::write(&path, raw).unwrap();
        let result = DispatchConfig::from_json_file(&path);
        let _ = std::fs::remove_file(&path);
        result
    }

    #[test]
    fn zero_tick_period_is_rejected() {
        let err = load("zero_period", r#"{"tick_period_secs": 0}"#).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidConfig(ref m) if m.contains("tick_period_secs")));
    }

    #[test]
    fn negative_server_timeout_is_rejected() {
        let err = load("negative_timeout", r#"{"server_timeout_secs": -1}"#).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidConfig(ref m) if m.contains("server_timeout_secs")));
    }

    #[test]
    fn out_of_range_values_do_not_panic_accessors() {
        let config = DispatchConfig {
            tick_period_secs: 0.0,
            server_timeout_secs: f64::NAN,
            ..DispatchConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.tick_period(), Duration::from_secs(2));
        assert_eq!(config.server_timeout(), Duration::from_secs(60));

        let huge = DispatchConfig {
            server_timeout_secs: 1e300,
            ..DispatchConfig::default()
        };
        assert!(huge.validate().is_err());
        assert_eq!(huge.server_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn default_config_is_valid() {
        DispatchConfig::default().validate().unwrap();
    }

    #[test]
    fn missing_config_file_is_io_error() {
        let err = DispatchConfig::from_json_file("/nonexistent/marker_dispatch.json").unwrap_err();
        assert!(matches!(err, DispatchError::Io(_)));
    }
}
