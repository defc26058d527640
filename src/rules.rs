//! Marker-to-joint command rules.
//!
//! A [`RuleTable`] is evaluated in order against the visible markers. Every rule that fires
//! contributes one [`JointCommand`]; rules that alternate direction read and then flip a
//! [`Bias`] channel. Evaluation never mutates anything in place: the updated [`BiasState`]
//! is handed back in the [`RuleOutcome`].

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::MarkerSet;
use crate::msgs::{JointCommand, JointState};
use crate::DispatchError;

/// Direction multiplier for a toggling motion. Always exactly `+1.0` or `-1.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    #[default]
    Forward,
    Reverse,
}

impl Bias {
    pub fn sign(self) -> f64 {
        match self {
            Bias::Forward => 1.0,
            Bias::Reverse => -1.0,
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            Bias::Forward => Bias::Reverse,
            Bias::Reverse => Bias::Forward,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BiasChannel {
    Translation,
    Extension,
}

/// The per-channel direction state carried between ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiasState {
    pub translation: Bias,
    pub extension: Bias,
}

impl BiasState {
    pub fn get(&self, channel: BiasChannel) -> Bias {
        match channel {
            BiasChannel::Translation => self.translation,
            BiasChannel::Extension => self.extension,
        }
    }

    pub fn toggled(mut self, channel: BiasChannel) -> Self {
        match channel {
            BiasChannel::Translation => self.translation = self.translation.flipped(),
            BiasChannel::Extension => self.extension = self.extension.flipped(),
        }
        self
    }
}

/// How a rule computes its target position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Target {
    /// A fixed position.
    Absolute(f64),
    /// `magnitude * bias`.
    Biased { magnitude: f64, channel: BiasChannel },
    /// `current + delta`, or `current + delta * bias` when a channel is set.
    Relative {
        delta: f64,
        channel: Option<BiasChannel>,
    },
}

impl Target {
    fn channel(&self) -> Option<BiasChannel> {
        match *self {
            Target::Absolute(_) => None,
            Target::Biased { channel, .. } => Some(channel),
            Target::Relative { channel, .. } => channel,
        }
    }
}

/// IF `marker` is visible (and `unless_visible` is not) THEN command `joint`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRule {
    pub marker: String,
    /// Marker whose presence suppresses this rule.
    pub unless_visible: Option<String>,
    pub joint: String,
    pub target: Target,
    pub velocity: f64,
    pub acceleration: f64,
}

impl CommandRule {
    pub fn new(marker: &str, joint: &str, target: Target, velocity: f64, acceleration: f64) -> Self {
        Self {
            marker: marker.to_string(),
            unless_visible: None,
            joint: joint.to_string(),
            target,
            velocity,
            acceleration,
        }
    }

    pub fn unless_visible(mut self, marker: &str) -> Self {
        self.unless_visible = Some(marker.to_string());
        self
    }

    pub fn matches(&self, markers: &MarkerSet) -> bool {
        markers.contains(&self.marker)
            && self
                .unless_visible
                .as_ref()
                .map_or(true, |m| !markers.contains(m))
    }

    /// Builds this rule's command from the current joint snapshot and bias.
    pub fn command(&self, joints: &JointState, bias: BiasState) -> Result<JointCommand, DispatchError> {
        let position = match self.target {
            Target::Absolute(p) => p,
            Target::Biased { magnitude, channel } => magnitude * bias.get(channel).sign(),
            Target::Relative { delta, channel } => {
                let current = joints.position(&self.joint)?;
                let sign = channel.map_or(1.0, |c| bias.get(c).sign());
                current + delta * sign
            }
        };

        Ok(JointCommand {
            joint: self.joint.clone(),
            position,
            velocity: self.velocity,
            acceleration: self.acceleration,
        })
    }

    pub fn bias_channel(&self) -> Option<BiasChannel> {
        self.target.channel()
    }
}

/// Commands produced by one evaluation plus the bias state to carry forward.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub commands: Vec<JointCommand>,
    pub bias: BiasState,
}

impl RuleOutcome {
    pub fn is_match(&self) -> bool {
        !self.commands.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTable {
    rules: Vec<CommandRule>,
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::stretch()
    }
}

impl RuleTable {
    pub fn new(rules: Vec<CommandRule>) -> Self {
        Self { rules }
    }

    /// The marker vocabulary for the Stretch mobile manipulator.
    #[allow(clippy::approx_constant)] // 3.14 is the driver's tuned base acceleration, not pi.
    pub fn stretch() -> Self {
        Self::new(vec![
            CommandRule::new("spin", "rotate_mobile_base", Target::Absolute(6.3), 1.0, 3.14),
            CommandRule::new(
                "translate",
                "translate_mobile_base",
                Target::Biased {
                    magnitude: 1.0,
                    channel: BiasChannel::Translation,
                },
                0.5,
                1.0,
            ),
            CommandRule::new(
                "move_up",
                "joint_lift",
                Target::Relative {
                    delta: 0.2,
                    channel: None,
                },
                0.2,
                1.0,
            ),
            CommandRule::new(
                "move_down",
                "joint_lift",
                Target::Relative {
                    delta: -0.2,
                    channel: None,
                },
                0.2,
                1.0,
            )
            .unless_visible("move_up"),
            CommandRule::new(
                "extend",
                "wrist_extension",
                Target::Relative {
                    delta: 0.2,
                    channel: Some(BiasChannel::Extension),
                },
                0.2,
                1.0,
            ),
        ])
    }

    pub fn rules(&self) -> &[CommandRule] {
        &self.rules
    }

    /// Evaluates every rule in table order.
    ///
    /// A rule whose joint is missing from `joints` is skipped for this call; it contributes
    /// no command and does not flip its bias channel.
    pub fn evaluate(&self, markers: &MarkerSet, joints: &JointState, bias: BiasState) -> RuleOutcome {
        let mut commands = Vec::new();
        let mut bias = bias;

        for rule in self.rules.iter().filter(|r| r.matches(markers)) {
            match rule.command(joints, bias) {
                Ok(cmd) => {
                    debug!(marker = %rule.marker, joint = %cmd.joint, position = cmd.position, "rule fired");
                    commands.push(cmd);
                    if let Some(channel) = rule.bias_channel() {
                        bias = bias.toggled(channel);
                    }
                }
                Err(e) => {
                    warn!(marker = %rule.marker, "Skipping rule this tick: {e}");
                }
            }
        }

        RuleOutcome { commands, bias }
    }
}
