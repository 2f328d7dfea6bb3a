// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::swerve::{HomingReport, ModulePosition, ModuleState};

// Per-module targets from the chassis kinematics layer -> runtime
// One state per configured module, in configuration order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleTargets {
    pub states: Vec<ModuleState>,
}

// Operator overrides
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OperatorCommand {
    AbortHoming,
    ToggleIdleMode,
}

/// Measured state of one module, published every tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleTelemetry {
    pub module: String,
    pub absolute_deg: f64,
    pub position: ModulePosition,
    pub state: ModuleState,
}

/// Homing correction of one module, before and after clamping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HomingSample {
    pub module: String,
    pub unclamped: f64,
    pub clamped: f64,
    pub zeroed: bool,
    pub sensor_anomaly: bool,
}

impl HomingSample {
    pub fn new(module: &str, report: &HomingReport) -> Self {
        Self {
            module: module.to_string(),
            unclamped: report.unclamped,
            clamped: report.output,
            zeroed: report.zeroed,
            sensor_anomaly: report.sensor_anomaly,
        }
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Homing,
    Ok,
    CmdStale,
    HomingFault,
}
