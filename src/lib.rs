//! provisr - idempotent provisioning for Debian/Ubuntu desktops
//!
//! A run is an ordered list of steps. Each step checks whether its goal state
//! is already in place, and only acts when it is not, so running provisr
//! again on a provisioned machine changes nothing.

pub mod config;
pub mod error;
pub mod exec;
pub mod net;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod step;
pub mod system;
pub mod toolbox;
pub mod workspace;

pub use config::Config;
pub use error::{ProvisionError, Result};
pub use pipeline::{StageSelection, build};
pub use report::{RunLog, RunReport, StepResult, StepStatus};
pub use runner::{RunOutcome, StepRegistry, StepRunner, StopSignal, StopSignals};
pub use step::{Action, FailurePolicy, Predicate, Stage, Step};
pub use toolbox::Toolbox;
