//! Steps: what to check, what to do, and what a failure means.

pub mod action;
pub mod definition;
pub mod predicate;

pub use action::{Action, AptRepository, VendorInstaller};
pub use definition::{FailurePolicy, Stage, Step};
pub use predicate::Predicate;
