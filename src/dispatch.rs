//! The periodic dispatch loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{JointStateCache, MarkerCache, MarkerSet};
use crate::msgs::TrajectoryGoal;
use crate::rules::{BiasState, RuleTable};
use crate::{DispatchConfig, DispatchError, TrajectoryExecutor, DEFAULT_TICK_PERIOD_SECS};

/// What a single tick observed and did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Nothing visible; the executor was not contacted.
    NoMarkers,
    /// Markers were visible but no rule produced a command.
    NoMatch { markers: MarkerSet },
    /// A goal was handed to the executor.
    Dispatched {
        markers: MarkerSet,
        goal: TrajectoryGoal,
    },
}

/// Owns the bias state and turns each tick's visible markers into at most one goal.
pub struct DispatchLoop {
    rules: RuleTable,
    joints: JointStateCache,
    markers: MarkerCache,
    executor: Arc<dyn TrajectoryExecutor>,
    bias: BiasState,
}

impl std::fmt::Debug for DispatchLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchLoop")
            .field("rules_len", &self.rules.rules().len())
            .field("bias", &self.bias)
            .finish()
    }
}

impl DispatchLoop {
    pub fn new(
        rules: RuleTable,
        joints: JointStateCache,
        markers: MarkerCache,
        executor: Arc<dyn TrajectoryExecutor>,
    ) -> Self {
        Self {
            rules,
            joints,
            markers,
            executor,
            bias: BiasState::default(),
        }
    }

    pub fn with_bias(mut self, bias: BiasState) -> Self {
        self.bias = bias;
        self
    }

    pub fn bias(&self) -> BiasState {
        self.bias
    }

    /// Runs one dispatch step.
    ///
    /// Submission is spawned onto the current tokio runtime and never awaited, so this must be
    /// called from within a runtime.
    #[instrument(level = "debug", skip(self))]
    pub fn tick(&mut self) -> TickOutcome {
        let markers = self.markers.get();
        if markers.is_empty() {
            info!("No markers visible");
            return TickOutcome::NoMarkers;
        }

        info!("Visible markers: {:?}", markers);

        let joints = self.joints.get();
        let outcome = self.rules.evaluate(&markers, &joints, self.bias);

        let Some(goal) = TrajectoryGoal::from_commands(&outcome.commands) else {
            return TickOutcome::NoMatch {
                markers: (*markers).clone(),
            };
        };

        self.submit(goal.clone());
        self.bias = outcome.bias;

        TickOutcome::Dispatched {
            markers: (*markers).clone(),
            goal,
        }
    }

    fn submit(&self, goal: TrajectoryGoal) {
        debug!(joints = ?goal.joint_names, "Sending trajectory goal");
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            if let Err(e) = executor.send_goal(goal).await {
                warn!("Trajectory goal was not delivered: {e}");
            }
        });
    }

    /// Ticks every `period` until `shutdown` resolves, then hands the loop back.
    ///
    /// The first tick fires one full period after the call. A zero period falls back to
    /// [`DEFAULT_TICK_PERIOD_SECS`].
    pub async fn run<F>(mut self, period: Duration, shutdown: F) -> Self
    where
        F: Future<Output = ()>,
    {
        let period = if period.is_zero() {
            warn!("Zero tick period requested, using {DEFAULT_TICK_PERIOD_SECS}s");
            Duration::from_secs_f64(DEFAULT_TICK_PERIOD_SECS)
        } else {
            period
        };
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Dispatch loop shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.tick();
                }
            }
        }

        self
    }
}

/// One-time startup readiness check against the executor.
///
/// Fails with [`DispatchError::ExecutorUnavailable`] if the executor does not come up within
/// the configured timeout; callers should treat that as fatal.
pub async fn ensure_executor_ready(
    executor: &dyn TrajectoryExecutor,
    config: &DispatchConfig,
) -> Result<(), DispatchError> {
    let timeout = config.server_timeout();
    if executor.wait_for_server(timeout).await {
        info!(action = %config.trajectory_action, "Trajectory executor is ready");
        return Ok(());
    }

    error!(
        "Action server not available after waiting for {} seconds. Exiting...",
        config.server_timeout_secs
    );
    Err(DispatchError::ExecutorUnavailable {
        name: config.trajectory_action.clone(),
        timeout,
    })
}
