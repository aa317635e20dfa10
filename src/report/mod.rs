//! Run results, the failure journal and the closing summary.

pub mod journal;
pub mod result;
pub mod summary;

pub use journal::RunLog;
pub use result::{RunReport, StepResult, StepStatus};
pub use summary::render;
