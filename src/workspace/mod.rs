//! Per-run filesystem resources: scratch directories and the run lock.

pub mod lock;
pub mod scratch;

pub use lock::RunLock;
pub use scratch::ScratchSpace;
