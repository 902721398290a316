// Message types exchanged with the teleop runtime

use serde::{Deserialize, Serialize};

// Command from teleop/scripts -> runtime
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaseCommand {
    pub linear: f32,  // m/s
    pub angular: f32, // rad/s
}

impl BaseCommand {
    pub fn new(linear: f32, angular: f32) -> Self {
        Self { linear, angular }
    }
}

// Actuation the runtime sends to the base
// Defaults to zero because a missing command means "stop"
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct BaseActuation {
    pub linear: f32,
    pub angular: f32,
}

impl From<&BaseCommand> for BaseActuation {
    fn from(cmd: &BaseCommand) -> Self {
        Self {
            linear: cmd.linear,
            angular: cmd.angular,
        }
    }
}

/// Health status reported by the runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    /// Base reports a bumper, cliff or wheel-drop event
    SafetyStop,
    DeviceError,
}
