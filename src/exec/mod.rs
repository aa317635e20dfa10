//! External process layer: command specs, the host runner, a mock runner for
//! tests, and secret redaction.

pub mod command;
pub mod mock;
pub mod redact;

pub use command::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
pub use mock::MockRunner;
pub use redact::Redactor;
