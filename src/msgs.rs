//! Message primitives exchanged with the robot.
//!
//! These mirror the shapes the driver and perception stacks publish: joint-state snapshots,
//! visible-marker arrays, and the joint-trajectory goal handed to the executor.

use serde::{Deserialize, Serialize};

use crate::DispatchError;

/// A full joint snapshot published by the robot's controller.
///
/// `name[i]` pairs positionally with `position[i]` and `velocity[i]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JointState {
    #[serde(default)]
    pub name: Vec<String>,
    #[serde(default)]
    pub position: Vec<f64>,
    #[serde(default)]
    pub velocity: Vec<f64>,
}

impl JointState {
    pub fn new(name: Vec<String>, position: Vec<f64>, velocity: Vec<f64>) -> Self {
        Self {
            name,
            position,
            velocity,
        }
    }

    /// Current position of `joint`.
    ///
    /// Fails with [`DispatchError::JointNotFound`] when the joint is absent, or when the
    /// snapshot carries the name without a matching position entry.
    pub fn position(&self, joint: &str) -> Result<f64, DispatchError> {
        self.name
            .iter()
            .position(|n| n == joint)
            .and_then(|i| self.position.get(i).copied())
            .ok_or_else(|| DispatchError::JointNotFound(joint.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

/// A single fiducial marker reported by the perception stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub name: String,
}

/// The perception stack's view of which markers are currently visible.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkerArray {
    #[serde(default)]
    pub markers: Vec<Marker>,
}

impl MarkerArray {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: names
                .into_iter()
                .map(|n| Marker { name: n.into() })
                .collect(),
        }
    }
}

/// One joint's contribution to a trajectory goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointCommand {
    pub joint: String,
    pub position: f64,
    pub velocity: f64,
    pub acceleration: f64,
}

/// A single waypoint; each vector is index-aligned with [`TrajectoryGoal::joint_names`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub positions: Vec<f64>,
    pub velocities: Vec<f64>,
    pub accelerations: Vec<f64>,
}

/// A joint-trajectory goal for the follow-joint-trajectory executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryGoal {
    pub joint_names: Vec<String>,
    pub points: Vec<TrajectoryPoint>,
}

impl TrajectoryGoal {
    /// Assembles a single-point goal from ordered commands.
    ///
    /// Returns `None` when there are no commands; an empty goal is never sent.
    pub fn from_commands(commands: &[JointCommand]) -> Option<Self> {
        if commands.is_empty() {
            return None;
        }

        let mut joint_names = Vec::with_capacity(commands.len());
        let mut point = TrajectoryPoint::default();

        for cmd in commands {
            joint_names.push(cmd.joint.clone());
            point.positions.push(cmd.position);
            point.velocities.push(cmd.velocity);
            point.accelerations.push(cmd.acceleration);
        }

        Some(Self {
            joint_names,
            points: vec![point],
        })
    }

    /// Target position for `joint` in the first waypoint, if present.
    pub fn target(&self, joint: &str) -> Option<f64> {
        let i = self.joint_names.iter().position(|n| n == joint)?;
        self.points.first()?.positions.get(i).copied()
    }
}

/// An inbound feed message carried over the IPC feed socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum FeedMessage {
    JointState(JointState),
    VisibleMarkers(MarkerArray),
}

#[cfg(test)]
#[allow(clippy::approx_constant)]
mod tests {
    use super::*;

    fn stretch_state() -> JointState {
        JointState::new(
            vec!["joint_lift".to_string(), "wrist_extension".to_string()],
            vec![0.6, 0.1],
            vec![0.0, 0.0],
        )
    }

    #[test]
    fn position_lookup_by_name() {
        let js = stretch_state();
        assert_eq!(js.position("wrist_extension").unwrap(), 0.1);
        assert!(matches!(
            js.position("joint_head_pan"),
            Err(DispatchError::JointNotFound(name)) if name == "joint_head_pan"
        ));
    }

    #[test]
    fn name_without_position_is_not_found() {
        let js = JointState::new(vec!["joint_lift".to_string()], vec![], vec![]);
        assert!(js.position("joint_lift").is_err());
    }

    #[test]
    fn goal_from_commands_keeps_arrays_aligned() {
        let commands = vec![
            JointCommand {
                joint: "rotate_mobile_base".to_string(),
                position: 6.3,
                velocity: 1.0,
                acceleration: 3.14,
            },
            JointCommand {
                joint: "joint_lift".to_string(),
                position: 0.8,
                velocity: 0.2,
                acceleration: 1.0,
            },
        ];

        let goal = TrajectoryGoal::from_commands(&commands).unwrap();
        assert_eq!(goal.joint_names, vec!["rotate_mobile_base", "joint_lift"]);
        assert_eq!(goal.points.len(), 1);
        let point = &goal.points[0];
        assert_eq!(point.positions, vec![6.3, 0.8]);
        assert_eq!(point.velocities, vec![1.0, 0.2]);
        assert_eq!(point.accelerations, vec![3.14, 1.0]);
        assert_eq!(goal.target("joint_lift"), Some(0.8));
    }

    #[test]
    fn no_commands_no_goal() {
        assert!(TrajectoryGoal::from_commands(&[]).is_none());
    }

    #[test]
    fn feed_message_uses_tagged_payload() {
        let raw = r#"{"type":"VisibleMarkers","payload":{"markers":[{"name":"spin"}]}}"#;
        let msg: FeedMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg, FeedMessage::VisibleMarkers(MarkerArray::from_names(["spin"])));

        let raw = r#"{"type":"JointState","payload":{"name":["joint_lift"],"position":[0.5]}}"#;
        let FeedMessage::JointState(js) = serde_json::from_str(raw).unwrap() else {
            panic!("expected joint state");
        };
        assert_eq!(js.position("joint_lift").unwrap(), 0.5);
        assert!(js.velocity.is_empty());
    }
}
