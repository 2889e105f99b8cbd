//! Node drain controller

mod controller;


pub use controller::{DrainController, StepOutcome, StepReason};
