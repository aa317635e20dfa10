//! Step registry and the sequential runner.

mod registry;
mod signals;
mod step_runner;

pub use registry::StepRegistry;
pub use signals::{StopSignal, StopSignals};
pub use step_runner::{RunOutcome, StepRunner};
