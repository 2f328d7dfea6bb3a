// Swerve module control
//
// Provides:
// - Wraparound-safe angle math and the wheel state value types
// - The per-module controller (homing and teleop driving)
// - The homing orchestrator that gates teleop on every module being zeroed

pub mod angle;
pub mod clamp;
pub mod homing;
mod module;
pub mod pid;
pub mod state;

pub use clamp::{ClampBand, ClampInterval, ClampPolicy};
pub use homing::{Homeable, HomingOrchestrator, HomingOutcome, HomingState};
pub use module::{HomingReport, SwerveModule};
pub use state::{ModulePosition, ModuleState};
